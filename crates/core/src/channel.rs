//! FIFO channel management
//!
//! The channel is a named pipe at a fixed path shared between the container
//! (writer) and the host dispatcher (reader). It is created once and never
//! removed by the dispatcher. Because the writer runs under a different user
//! mapping than the host reader, the FIFO is made world-readable/writable.

use crate::errors::{ChannelError, Result};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Default permission bits for the channel
pub const DEFAULT_CHANNEL_MODE: u32 = 0o666;

/// Default channel location on provisioned nodes
pub const DEFAULT_CHANNEL_PATH: &str = "/opt/cmdpipe/dockerpipe";

/// What currently occupies the channel path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Nothing exists at the path
    Missing,
    /// A FIFO with the given permission bits
    Fifo { mode: u32 },
    /// Some other file type (regular file, directory, socket, ...)
    Other { kind: String },
}

/// Result of [`ensure_channel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// A new FIFO was created
    Created,
    /// A FIFO was already present; permissions were re-applied
    Existing,
}

impl ChannelOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Existing => "existing",
        }
    }
}

/// Inspect the channel path without modifying anything.
///
/// Symlinks are followed, so a link pointing at a FIFO counts as a FIFO.
pub fn inspect_channel(path: &Path) -> Result<ChannelStatus> {
    platform::inspect(path)
}

/// Guarantee a usable FIFO exists at `path` with permissions `mode`.
///
/// Missing parent directories are created. An existing FIFO is left in place
/// and its permissions are re-applied only when they differ from `mode`, so
/// calling this repeatedly is safe. Anything else at the path is a fatal configuration error; it is
/// never deleted.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), mode = %format!("{:o}", mode)))]
pub fn ensure_channel(path: &Path, mode: u32) -> Result<ChannelOutcome> {
    let outcome = match inspect_channel(path)? {
        ChannelStatus::Fifo { mode: current } if current == mode => {
            debug!("Channel {} already present", path.display());
            return Ok(ChannelOutcome::Existing);
        }
        ChannelStatus::Fifo { .. } => ChannelOutcome::Existing,
        ChannelStatus::Other { kind } => {
            return Err(ChannelError::NotAFifo {
                path: path.to_path_buf(),
                kind,
            }
            .into())
        }
        ChannelStatus::Missing => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| ChannelError::Create {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
            platform::create_fifo(path, mode)?
        }
    };

    platform::set_mode(path, mode)?;

    match outcome {
        ChannelOutcome::Created => info!("Created channel {} ({:o})", path.display(), mode),
        ChannelOutcome::Existing => info!("Reset channel {} to {:o}", path.display(), mode),
    }
    Ok(outcome)
}

/// Make the channel usable for the dispatcher without taking ownership of it.
///
/// A missing channel is created as in [`ensure_channel`]. An existing FIFO
/// whose permissions already include every bit of `mode` is accepted as is;
/// the service account may not own a channel provisioned at install time.
/// Anything narrower goes through [`ensure_channel`].
pub fn prepare_channel(path: &Path, mode: u32) -> Result<ChannelOutcome> {
    match inspect_channel(path)? {
        ChannelStatus::Fifo { mode: current } if grants(current, mode) => {
            debug!(
                "Using existing channel {} ({:o})",
                path.display(),
                current
            );
            Ok(ChannelOutcome::Existing)
        }
        _ => ensure_channel(path, mode),
    }
}

/// Whether permission bits `current` include all of `requested`
fn grants(current: u32, requested: u32) -> bool {
    current & requested == requested
}

#[cfg(unix)]
mod platform {
    use super::{ChannelOutcome, ChannelStatus};
    use crate::errors::{ChannelError, Result};
    use nix::errno::Errno;
    use nix::sys::stat::Mode;
    use std::fs::{self, FileType};
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};
    use std::path::Path;

    pub(super) fn inspect(path: &Path) -> Result<ChannelStatus> {
        match fs::metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => Ok(ChannelStatus::Fifo {
                mode: meta.permissions().mode() & 0o777,
            }),
            Ok(meta) => Ok(ChannelStatus::Other {
                kind: kind_name(&meta.file_type()).to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ChannelStatus::Missing),
            Err(source) => Err(ChannelError::Read {
                path: path.to_path_buf(),
                source,
            }
            .into()),
        }
    }

    pub(super) fn create_fifo(path: &Path, mode: u32) -> Result<ChannelOutcome> {
        match nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode)) {
            Ok(()) => Ok(ChannelOutcome::Created),
            // Lost a race with another installer; accept it only if it is a FIFO
            Err(Errno::EEXIST) => match inspect(path)? {
                ChannelStatus::Fifo { .. } => Ok(ChannelOutcome::Existing),
                ChannelStatus::Other { kind } => Err(ChannelError::NotAFifo {
                    path: path.to_path_buf(),
                    kind,
                }
                .into()),
                ChannelStatus::Missing => Err(ChannelError::Missing {
                    path: path.to_path_buf(),
                }
                .into()),
            },
            Err(errno) => Err(ChannelError::Create {
                path: path.to_path_buf(),
                source: std::io::Error::from(errno),
            }
            .into()),
        }
    }

    /// Apply `mode` explicitly; mkfifo is subject to the process umask.
    pub(super) fn set_mode(path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
            ChannelError::Permissions {
                path: path.to_path_buf(),
                mode,
                source,
            }
            .into()
        })
    }

    fn kind_name(file_type: &FileType) -> &'static str {
        if file_type.is_dir() {
            "directory"
        } else if file_type.is_file() {
            "regular file"
        } else if file_type.is_socket() {
            "socket"
        } else if file_type.is_block_device() {
            "block device"
        } else if file_type.is_char_device() {
            "character device"
        } else if file_type.is_symlink() {
            "symlink"
        } else {
            "unknown file type"
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::{ChannelOutcome, ChannelStatus};
    use crate::errors::{ChannelError, Result};
    use std::path::Path;

    pub(super) fn inspect(_path: &Path) -> Result<ChannelStatus> {
        Err(ChannelError::Unsupported.into())
    }

    pub(super) fn create_fifo(_path: &Path, _mode: u32) -> Result<ChannelOutcome> {
        Err(ChannelError::Unsupported.into())
    }

    pub(super) fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
        Err(ChannelError::Unsupported.into())
    }
}
