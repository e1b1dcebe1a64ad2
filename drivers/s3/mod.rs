//! S3 compatible object storage / S3兼容对象存储
//!
//! Supports AWS S3, MinIO, Aliyun OSS, Tencent COS and other S3 compatible
//! stores. / 支持AWS S3、MinIO、阿里云OSS、腾讯云COS等

pub mod client;
pub mod config;
pub mod factory;
pub mod file_system;
pub mod reader;
pub mod transfer;
pub mod writer;

#[cfg(test)]
pub mod mock;

pub use client::{ClientFactory, ClientSlot, ObjectClient, RustS3Client, RustS3ClientFactory};
pub use config::S3Conf;
pub use factory::S3FileSystemFactory;
pub use file_system::{S3FileSystem, S3FileSystemBuilder, MAX_DELETE_BATCH};
pub use reader::S3FileReader;
pub use transfer::{TransferHandle, TransferManager, TransferStatus, PART_SIZE};
pub use writer::S3FileWriter;
