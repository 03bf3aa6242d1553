use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cloud has {points} points but {normals} normals")]
    NormalCountMismatch { points: usize, normals: usize },
    #[error("model point cloud is empty")]
    EmptyModel,
    #[error("a model named {0:?} is already registered")]
    DuplicateModel(String),
}
