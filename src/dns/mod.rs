pub mod edns;
pub mod enums;
pub mod header;
pub mod message;
pub mod name;
pub mod question;
pub mod rdata;
pub mod record;
pub mod wire;

pub use edns::EdnsOpt;
pub use enums::{EdeCode, Opcode, RRClass, RRType, Rcode};
pub use header::DnsHeader;
pub use message::Message;
pub use name::Name;
pub use question::Question;
pub use rdata::RData;
pub use record::ResourceRecord;
