pub mod notify;
pub mod parser;
pub mod refresh;
pub mod rrset;
pub mod store;
pub mod transfer;
#[allow(clippy::module_inception)]
pub mod zone;

pub use notify::{NotifyRequest, spawn_notifier};
pub use parser::{ParsedZone, ZoneFileParser, write_zone_file};
pub use refresh::{RefreshRequest, spawn_refresher};
pub use rrset::{OwnerData, Rrset};
pub use store::ZoneStore;
pub use zone::{StoreKind, Zone, ZoneAnswer, ZoneOptions, ZoneType, serial_gt, serial_next};
