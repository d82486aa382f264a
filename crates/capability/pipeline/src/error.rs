use ems_storage::StorageError;

/// 流水线错误。
///
/// 单点读取失败、单点写入失败不走这里，只计数并记录日志；
/// 只有导致整轮无法继续的存储错误才会上抛到轮询边界。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("provisioning error: {0}")]
    Provision(String),
}
