/// Domain models
pub mod config;
pub mod document;
pub mod job;
pub mod message;
pub mod party;
pub mod transaction;
pub mod user;

pub use config::{CostPolicy, LlmConfig, MailgraphConfig, OAuthConfig, SyncConfig, WorkerConfig};
pub use document::{
    Document, DocumentType, ExtractedFields, ExtractionMethod, ExtractionStatus, LineItem,
    PipelineState,
};
pub use job::{Job, JobKind, JobStatus, ProcessAttachmentPayload, ProcessUploadPayload};
pub use message::{
    AttachmentDescriptor, DownloadState, Message, QualificationOutcome, QualificationStage,
};
pub use party::{Party, PartyType};
pub use transaction::{Transaction, TransactionKind};
pub use user::User;
