//! Byte-exact wire contract with the on-chain messenger program:
//! instruction payloads and account orderings, emitted event records, and
//! the registry account layout.

pub mod event;
pub mod instruction;
pub mod registry;

pub use event::{parse_events, MessageSent, MAX_CIPHERTEXT_LEN};
pub use instruction::{AccountMeta, Instruction, SendLayout};
pub use registry::RegistryEntry;
