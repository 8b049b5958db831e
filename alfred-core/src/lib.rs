pub mod command;
pub mod event;
pub mod label;
pub mod payload;
pub mod signature;
pub mod stream;

pub use command::{
    parse_comment, validate_command_table, Badge, Command, CommandSyntaxError, CommandTableError,
    Commentator, LedgerKind, COMMAND_TABLE,
};
pub use event::{classify, Classification, ClassifyError, IssueRef, WebhookEvent};
pub use label::{Difficulty, LabelKind};
pub use payload::normalize_login;
pub use signature::{
    compute_signature, format_signature_header, sign_payload, verify_github_signature,
};
pub use stream::{
    Channel, StreamRecord, StructureKind, StructureSpec, RECORD_FIELD, REQUIRED_STRUCTURES, SENTINEL,
};
