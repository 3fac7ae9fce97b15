use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("shard '{0}' is closed")]
    ShardClosed(char),
}
