use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::Metadata;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tracing::{debug, info};

use super::path::base_name;
use super::types::{FileKind, FileMeta, FileWriter, IoBackend, OpenFile};
use crate::error::{Error, TransferError};
use crate::models::Endpoint;
use crate::ssh_service::Connection;

/// A remote endpoint reached through the SFTP subsystem. The backend owns
/// its connection; [`SftpBackend::close`] releases both.
pub struct SftpBackend {
    name: String,
    sftp: SftpSession,
    connection: Connection,
}

impl SftpBackend {
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, Error> {
        let connection = Connection::open(endpoint).await?;
        match start_sftp(&connection).await {
            Ok(sftp) => {
                info!("SFTP session open on {}", connection.address());
                Ok(Self {
                    name: endpoint.display_name().to_string(),
                    sftp,
                    connection,
                })
            }
            Err(err) => {
                let _ = connection.close().await;
                Err(err)
            }
        }
    }

    pub async fn close(self) {
        if let Err(err) = self.sftp.close().await {
            debug!("Closing SFTP session on {}: {}", self.name, err);
        }
        if let Err(err) = self.connection.close().await {
            debug!("Disconnect from {}: {}", self.connection.address(), err);
        }
    }
}

async fn start_sftp(connection: &Connection) -> Result<SftpSession, Error> {
    let channel = connection.open_channel().await?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|err| Error::session("requesting the sftp subsystem", err))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|err| Error::session("starting sftp", err))
}

fn remote_error(path: &str, err: SftpError) -> TransferError {
    match &err {
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile => {
            TransferError::NotFound {
                path: path.to_string(),
            }
        }
        _ => TransferError::Remote {
            path: path.to_string(),
            message: err.to_string(),
        },
    }
}

fn meta_from(name: &str, metadata: &Metadata) -> FileMeta {
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        FileKind::Dir
    } else if file_type.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    };
    FileMeta {
        name: name.to_string(),
        kind,
        size: metadata.size,
    }
}

#[async_trait]
impl IoBackend for SftpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &str) -> Result<FileMeta, TransferError> {
        let metadata = self
            .sftp
            .metadata(path)
            .await
            .map_err(|err| remote_error(path, err))?;
        Ok(meta_from(base_name(path), &metadata))
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransferError> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|err| remote_error(path, err))
    }

    async fn create(&self, path: &str) -> Result<FileWriter, TransferError> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|err| remote_error(path, err))?;
        Ok(Box::new(file))
    }

    async fn open(&self, path: &str) -> Result<OpenFile, TransferError> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|err| remote_error(path, err))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|err| remote_error(path, err))?;
        Ok(OpenFile {
            meta: meta_from(base_name(path), &metadata),
            reader: Box::new(file),
        })
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FileMeta>, TransferError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|err| remote_error(path, err))?;

        let mut items: Vec<FileMeta> = entries
            .filter(|entry| entry.file_name() != "." && entry.file_name() != "..")
            .map(|entry| meta_from(&entry.file_name(), &entry.metadata()))
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}
