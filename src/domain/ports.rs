use crate::domain::model::{OutputFormat, RawBatch, RunArtifacts};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    /// 寫入必須是原子性的：要嘛完整寫入，要嘛不留下任何檔案
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// 建立新目錄；已存在時回傳 `false`
    fn create_dir(&self, path: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    fn input_path(&self) -> &str;
    fn output_dir(&self) -> &str;
    fn strict(&self) -> bool;
    fn workers(&self) -> usize;
    fn output_formats(&self) -> &[OutputFormat];
    fn bundle(&self) -> bool;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<RawBatch>;
    async fn transform(&self, batch: RawBatch) -> Result<RunArtifacts>;
    async fn load(&self, artifacts: RunArtifacts) -> Result<String>;
}
