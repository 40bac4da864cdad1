mod awaiting;
mod checkpointing;
mod loading;
mod local_work;
mod terminal;
mod uploading;

pub use self::{
    awaiting::AwaitingGlobal,
    checkpointing::Checkpointing,
    loading::LoadingGlobal,
    local_work::LocalWork,
    terminal::{Advanced, RolledBack},
    uploading::Uploading,
};
