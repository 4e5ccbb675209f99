//! Pure path-name derivation for the coordination store.
//!
//! [`PathCatalog`] derives the fixed set of store paths for a `(base,
//! clusterName)` pair and encodes/decodes the `{nodeId}|{joinSeq}|{sequence}`
//! node-name format used under `alive/`. Performs no I/O.

use std::fmt;

use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

/// Zero-padding width for store-assigned sequential node names.
const SEQUENCE_WIDTH: usize = 10;

/// Errors raised while deriving or parsing store paths.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("base path must be a well-formed store path, got {0:?}")]
    InvalidBase(String),
    #[error("cluster name must be non-empty")]
    EmptyClusterName,
    #[error("malformed node name {0:?}: expected {{uuid}}|{{joinSeq}}|{{storeSeq}}")]
    MalformedAliveName(String),
    #[error("malformed join-data name {0:?}: expected {{uuid}}|{{storeSeq}}")]
    MalformedJoinDataName(String),
    #[error("malformed custom-event name {0:?}: expected {{uuid}}|{{storeSeq}}")]
    MalformedCustomEventName(String),
}

/// The fixed set of store paths derived from `(base, clusterName)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCatalog {
    base_path: String,
    cluster_dir: String,
    evts_path: String,
    join_data_dir: String,
    custom_evts_dir: String,
    alive_nodes_dir: String,
}

impl PathCatalog {
    /// Derives the catalog for `(base, cluster_name)`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::InvalidBase`] if `base` is not a well-formed
    /// store path (must start with `/` and contain no empty segments, no
    /// trailing slash other than the root, and no `|` characters), or
    /// [`PathError::EmptyClusterName`] if `cluster_name` is empty.
    pub fn new(base: &str, cluster_name: &str) -> Result<Self, PathError> {
        Self::validate_base(base)?;
        if cluster_name.is_empty() {
            return Err(PathError::EmptyClusterName);
        }

        let base_path = base.trim_end_matches('/').to_string();
        let cluster_dir = format!("{base_path}/{cluster_name}");

        Ok(Self {
            evts_path: format!("{cluster_dir}/events"),
            join_data_dir: format!("{cluster_dir}/joinData"),
            custom_evts_dir: format!("{cluster_dir}/customEvents"),
            alive_nodes_dir: format!("{cluster_dir}/alive"),
            cluster_dir,
            base_path,
        })
    }

    /// Validates that `base` is a well-formed store path: absolute, no
    /// empty segments, and free of the `|` delimiter used in node names.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::InvalidBase`] describing the violation.
    pub fn validate_base(base: &str) -> Result<(), PathError> {
        if !base.starts_with('/') || base.contains('|') {
            return Err(PathError::InvalidBase(base.to_string()));
        }
        let trimmed = base.trim_end_matches('/');
        if trimmed.is_empty() && base != "/" {
            return Err(PathError::InvalidBase(base.to_string()));
        }
        if trimmed.split('/').skip(1).any(str::is_empty) {
            return Err(PathError::InvalidBase(base.to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    #[must_use]
    pub fn cluster_dir(&self) -> &str {
        &self.cluster_dir
    }

    #[must_use]
    pub fn evts_path(&self) -> &str {
        &self.evts_path
    }

    #[must_use]
    pub fn join_data_dir(&self) -> &str {
        &self.join_data_dir
    }

    #[must_use]
    pub fn custom_evts_dir(&self) -> &str {
        &self.custom_evts_dir
    }

    #[must_use]
    pub fn alive_nodes_dir(&self) -> &str {
        &self.alive_nodes_dir
    }

    /// All persistent/directory paths that must exist before a node can
    /// join, in creation order.
    #[must_use]
    pub fn tree(&self) -> [&str; 5] {
        [
            &self.cluster_dir,
            &self.evts_path,
            &self.join_data_dir,
            &self.custom_evts_dir,
            &self.alive_nodes_dir,
        ]
    }

    /// Builds the join-data child prefix (`{uuid}|`) under `joinData/` that
    /// the store appends a sequence number to on ephemeral-sequential
    /// creation.
    #[must_use]
    pub fn join_data_prefix(node_id: Uuid) -> String {
        format!("{node_id}|")
    }

    /// Builds the alive-node child prefix (`{uuid}|{joinSeq}|`) under
    /// `alive/` that the store appends a sequence number to on
    /// ephemeral-sequential creation.
    #[must_use]
    pub fn alive_prefix(node_id: Uuid, join_seq: u64) -> String {
        format!("{node_id}|{join_seq:0width$}|", width = SEQUENCE_WIDTH)
    }

    /// Derives the join-data path for a parsed alive-node name.
    #[must_use]
    pub fn join_data_path(&self, decoded: &AliveName) -> String {
        format!(
            "{}/{}|{:0width$}",
            self.join_data_dir,
            decoded.node_id,
            decoded.join_seq,
            width = SEQUENCE_WIDTH
        )
    }

    /// Per-event directory path under `events/`.
    #[must_use]
    pub fn event_dir(&self, event_id: u64) -> String {
        format!("{}/{event_id}", self.evts_path)
    }

    /// Per-event `joined` child path, holding `JoinEventDataForJoined`.
    #[must_use]
    pub fn event_joined_path(&self, event_id: u64) -> String {
        format!("{}/joined", self.event_dir(event_id))
    }

    /// Ack child path for a custom event, keyed by the acking member's
    /// `internal_id`.
    #[must_use]
    pub fn custom_event_ack_path(custom_event_path: &str, internal_id: u64) -> String {
        format!("{custom_event_path}/{internal_id}")
    }

    /// Parses an `alive/` child name of the form `{uuid}|{joinSeq}|{storeSeq}`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::MalformedAliveName`] if the name does not split
    /// into exactly three `|`-separated fields, or if any field fails to
    /// parse.
    pub fn decode_alive_name(name: &str) -> Result<AliveName, PathError> {
        let parts: Vec<&str> = name.split('|').collect();
        let [uuid_part, join_seq_part, store_seq_part] = parts.as_slice() else {
            return Err(PathError::MalformedAliveName(name.to_string()));
        };
        let node_id = Uuid::parse_str(uuid_part)
            .map_err(|_| PathError::MalformedAliveName(name.to_string()))?;
        let join_seq: u64 = join_seq_part
            .parse()
            .map_err(|_| PathError::MalformedAliveName(name.to_string()))?;
        let store_seq: u64 = store_seq_part
            .parse()
            .map_err(|_| PathError::MalformedAliveName(name.to_string()))?;
        Ok(AliveName {
            node_id,
            join_seq,
            store_seq,
        })
    }

    /// Parses a `joinData/` or `customEvents/` child name of the form
    /// `{uuid}|{storeSeq}`.
    ///
    /// # Errors
    ///
    /// Returns `err_kind(name)` if the name does not split into exactly two
    /// `|`-separated fields, or if either field fails to parse.
    pub fn decode_sequential_name(
        name: &str,
        err_kind: impl Fn(String) -> PathError,
    ) -> Result<(Uuid, u64), PathError> {
        let parts: Vec<&str> = name.split('|').collect();
        let [uuid_part, seq_part] = parts.as_slice() else {
            return Err(err_kind(name.to_string()));
        };
        let node_id = Uuid::parse_str(uuid_part).map_err(|_| err_kind(name.to_string()))?;
        let seq: u64 = seq_part.parse().map_err(|_| err_kind(name.to_string()))?;
        Ok((node_id, seq))
    }

    /// Returns a regex matching the `{uuid}|{joinSeq}|{storeSeq}` shape,
    /// useful for consumers validating names outside the decode path.
    #[must_use]
    pub fn alive_name_pattern() -> Regex {
        Regex::new(
            r"^[0-9a-fA-F-]{36}\|\d{1,20}\|\d{1,20}$",
        )
        .expect("static pattern is valid")
    }
}

/// Decoded fields of an `alive/` child name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliveName {
    pub node_id: Uuid,
    pub join_seq: u64,
    pub store_seq: u64,
}

impl fmt::Display for AliveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{:0width$}|{:0width$}",
            self.node_id,
            self.join_seq,
            self.store_seq,
            width = SEQUENCE_WIDTH
        )
    }
}
