//! Machine-readable harness reports.
//!
//! Every report is an envelope around one payload. The envelope carries the
//! SHA-256 of the payload's canonical JSON, so a stored report can be checked
//! for tampering or drift with [`Report::verify`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use glibcshim_abi::ModuleInfo;
use glibcshim_core::{Catalog, CatalogStats, Origin, Resolution, ShimError};

pub const REPORT_VERSION: u32 = 1;

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(&mut out, "{b:02x}").expect("writing to String should not fail");
    }
    out
}

/// SHA-256 of `value` serialized as compact JSON.
pub fn payload_digest<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    Ok(hex_lower(&Sha256::digest(&bytes)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report<T> {
    pub version: u32,
    /// Subcommand that produced the report.
    pub kind: String,
    pub timestamp: String,
    pub sha256: String,
    pub payload: T,
}

impl<T: Serialize> Report<T> {
    pub fn new(kind: &str, timestamp: String, payload: T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            version: REPORT_VERSION,
            kind: kind.to_string(),
            timestamp,
            sha256: payload_digest(&payload)?,
            payload,
        })
    }

    /// Whether `sha256` still matches the payload.
    pub fn verify(&self) -> bool {
        payload_digest(&self.payload).is_ok_and(|d| d == self.sha256)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Seconds since the epoch, or a fixed string for reproducible output.
pub fn timestamp(fixed: Option<String>) -> String {
    fixed.unwrap_or_else(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
            .to_string()
    })
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRowReport {
    pub name: String,
    pub passthrough: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogReport {
    pub total: usize,
    pub wrappers: usize,
    pub passthrough: usize,
    /// Present only when rows were requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<CatalogRowReport>,
}

impl CatalogReport {
    pub fn from_catalog(catalog: &Catalog, stats: CatalogStats, with_entries: bool) -> Self {
        let mut entries: Vec<CatalogRowReport> = if with_entries {
            catalog
                .entries()
                .iter()
                .map(|e| CatalogRowReport {
                    name: e.name.to_string(),
                    passthrough: e.is_passthrough(),
                })
                .collect()
        } else {
            Vec::new()
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            total: stats.total,
            wrappers: stats.wrappers,
            passthrough: stats.passthrough,
            entries,
        }
    }
}

/// Stable origin label for reports.
pub fn origin_label(origin: Origin) -> String {
    match origin {
        Origin::Wrapper => "wrapper".to_string(),
        Origin::PassThrough => "pass-through".to_string(),
        Origin::Foreign(handle) => format!("foreign:{handle:#x}"),
        Origin::Host => "host".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub name: String,
    /// Absent when addresses were suppressed for cross-run comparison.
    pub address: Option<String>,
    pub origin: Option<String>,
    pub error: Option<String>,
}

impl SymbolReport {
    pub fn new(name: &str, result: Result<Resolution, ShimError>, with_address: bool) -> Self {
        match result {
            Ok(r) => Self {
                name: name.to_string(),
                address: with_address.then(|| format!("{:#x}", r.addr)),
                origin: Some(origin_label(r.origin)),
                error: None,
            },
            Err(e) => Self {
                name: name.to_string(),
                address: None,
                origin: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn resolved(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub symbols: Vec<SymbolReport>,
    pub unresolved: usize,
}

impl ResolveReport {
    pub fn new(symbols: Vec<SymbolReport>) -> Self {
        let unresolved = symbols.iter().filter(|s| !s.resolved()).count();
        Self {
            symbols,
            unresolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReport {
    pub handle: String,
    pub path: String,
    pub soname: Option<String>,
    pub base: String,
    pub map_size: usize,
    pub tls_slot: Option<u64>,
    pub refcount: usize,
    pub blake3: String,
}

impl From<&ModuleInfo> for ModuleReport {
    fn from(m: &ModuleInfo) -> Self {
        Self {
            handle: format!("{:#x}", m.handle),
            path: m.path.display().to_string(),
            soname: m.soname.clone(),
            base: format!("{:#x}", m.base),
            map_size: m.map_size,
            tls_slot: m.tls_slot,
            refcount: m.refcount,
            blake3: m.digest.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub path: String,
    pub handle: String,
    pub modules: Vec<ModuleReport>,
    /// Whether the harness unloaded the image again before exiting.
    pub unloaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_tracks_payload() {
        let payload = ResolveReport::new(vec![SymbolReport {
            name: "memcpy".to_string(),
            address: None,
            origin: Some("pass-through".to_string()),
            error: None,
        }]);
        let mut report = Report::new("resolve", "0".to_string(), payload).unwrap();
        assert_eq!(report.version, REPORT_VERSION);
        assert_eq!(report.sha256.len(), 64);
        assert!(report.verify());

        report.payload.unresolved = 3;
        assert!(!report.verify());
    }

    #[test]
    fn digest_matches_known_sha256() {
        // sha256("null")
        assert_eq!(
            payload_digest(&()).unwrap(),
            "74234e98afe7498fb5daf1f36ac2d78acc339464f950703b8c019892f982b90b"
        );
    }

    #[test]
    fn json_round_trip_keeps_digest_valid() {
        let stats = CatalogStats {
            total: 3,
            wrappers: 2,
            passthrough: 1,
        };
        let catalog = Catalog::new(Vec::new());
        let report = Report::new(
            "catalog-stats",
            timestamp(Some("fixed".to_string())),
            CatalogReport::from_catalog(&catalog, stats, true),
        )
        .unwrap();
        let json = report.to_json().unwrap();
        assert!(!json.contains("entries"));
        let back: Report<CatalogReport> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert!(back.verify());
    }

    #[test]
    fn origin_labels_are_stable() {
        assert_eq!(origin_label(Origin::Wrapper), "wrapper");
        assert_eq!(origin_label(Origin::Foreign(0x3)), "foreign:0x3");
    }
}
