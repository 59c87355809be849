#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SubmitError {
    #[error("job has unresolved dependencies")]
    NotReady,
    #[error("priority queue is full")]
    QueueFull,
}
