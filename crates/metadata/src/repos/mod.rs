//! Repository traits for metadata operations.

pub mod files;
pub mod import_jobs;
pub mod records;
pub mod uploads;

pub use files::FileRepo;
pub use import_jobs::ImportJobRepo;
pub use records::{RecordRepo, UpsertKind};
pub use uploads::UploadRepo;
