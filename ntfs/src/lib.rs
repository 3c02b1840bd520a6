//! Read-only NTFS structural parser: MBR discovery, boot-sector geometry,
//! MFT traversal and non-resident stream reconstruction over a raw block
//! device. Nothing here mounts or mutates a volume.

pub mod attributes;
pub mod boot_sector;
pub mod data_runs;
pub mod index;
pub mod mbr;
pub mod mft;
pub mod partition;
pub mod path_resolver;
pub mod pool;
pub mod record;
pub mod stream;
pub mod structures;

#[cfg(test)]
mod testkit;

pub use attributes::Attribute;
pub use boot_sector::{decode_boot_sector, interpret_boot_sector, VolumeGeometry};
pub use data_runs::{decode_runs, total_clusters, RunChunk};
pub use index::{DirEntry, DirectoryIndex};
pub use mbr::{discover_partitions, MbrPartition};
pub use mft::{CatalogEntry, FoundAttribute, Mft};
pub use partition::{shared_device, Partition, SharedDevice};
pub use path_resolver::PathResolver;
pub use pool::{BufferChain, BufferPool};
pub use record::FileRecord;
pub use stream::AttributeStream;
