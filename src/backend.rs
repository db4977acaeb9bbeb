use std::fmt;
use std::sync::Arc;

use crate::error::OffloadError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendStatus {
    Success,
    Fallback,
    InvalidModel,
    UnsupportedOperator,
    UnsupportedAttribute,
    UnsupportedShape,
    UnsupportedDataType,
    BackendUnavailable,
    InternalError,
    Other(i32),
}

impl BackendStatus {
    pub fn is_success(self) -> bool {
        self == BackendStatus::Success
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::Success => write!(f, "success"),
            BackendStatus::Fallback => write!(f, "fallback"),
            BackendStatus::InvalidModel => write!(f, "invalid model"),
            BackendStatus::UnsupportedOperator => write!(f, "unsupported operator"),
            BackendStatus::UnsupportedAttribute => write!(f, "unsupported attribute"),
            BackendStatus::UnsupportedShape => write!(f, "unsupported shape"),
            BackendStatus::UnsupportedDataType => write!(f, "unsupported data type"),
            BackendStatus::BackendUnavailable => write!(f, "backend unavailable"),
            BackendStatus::InternalError => write!(f, "internal error"),
            BackendStatus::Other(code) => write!(f, "status {:#x}", code),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InfoKey {
    Name,
    Vendor,
    Version,
    Device,
}

/// The accelerator runtime. Every call is synchronous; a non-success status
/// from `check_compatibility` only ever means "unsupported".
pub trait BackendLibrary: Send + Sync {
    fn backend_ids(&self) -> Result<Vec<BackendId>, BackendStatus>;

    fn backend_info(&self, id: BackendId, key: InfoKey) -> Result<String, BackendStatus>;

    fn check_compatibility(&self, id: BackendId, model: &[u8]) -> BackendStatus;

    fn release_backend_id(&self, id: BackendId) -> BackendStatus;
}

/// Backend IDs acquired from a library. IDs are enumerated once on
/// construction and released when the handle table is dropped.
pub struct BackendHandles {
    library: Arc<dyn BackendLibrary>,
    ids: Vec<BackendId>,
}

impl BackendHandles {
    pub fn acquire(library: Arc<dyn BackendLibrary>) -> Result<Self, OffloadError> {
        let ids = library
            .backend_ids()
            .map_err(OffloadError::BackendEnumeration)?;
        if ids.is_empty() {
            return Err(OffloadError::NoBackend);
        }
        log::debug!("acquired {} backend id(s)", ids.len());
        Ok(BackendHandles { library, ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[BackendId] {
        &self.ids
    }

    pub fn info(&self, index: usize, key: InfoKey) -> Result<String, BackendStatus> {
        let id = self
            .ids
            .get(index)
            .copied()
            .ok_or(BackendStatus::BackendUnavailable)?;
        self.library.backend_info(id, key)
    }

    /// Index of the first backend whose device description contains `marker`.
    pub fn find_device(&self, marker: &str) -> Option<usize> {
        (0..self.ids.len()).find(|&idx| {
            self.info(idx, InfoKey::Device)
                .map(|device| device.contains(marker))
                .unwrap_or(false)
        })
    }

    pub fn check(&self, index: usize, model: &[u8]) -> BackendStatus {
        match self.ids.get(index) {
            Some(id) => self.library.check_compatibility(*id, model),
            None => BackendStatus::BackendUnavailable,
        }
    }
}

impl Drop for BackendHandles {
    fn drop(&mut self) {
        for id in &self.ids {
            let status = self.library.release_backend_id(*id);
            if !status.is_success() {
                log::error!("Error when releasing backend id {:?}: {}", id, status);
            }
        }
    }
}
