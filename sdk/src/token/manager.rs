//! Vendor library loading and slot/session management.
//!
//! Several middleware libraries can be installed side by side (e.g.
//! SafeNet eToken plus OpenSC). Each is loaded independently; one
//! failing to load is a warning, not a startup failure, as long as at
//! least one loads. Slot enumeration merges the slots of every loaded
//! library; a slot whose token cannot be read is skipped with a
//! warning.
//!
//! Sessions are single-threaded with respect to the token; the
//! caller serializes all PKCS#11 calls for one session.

use {
    super::TokenError,
    cryptoki::{
        context::{CInitializeArgs, CInitializeFlags, Pkcs11},
        session::{Session, UserType},
        slot::Slot,
        types::AuthPin,
    },
    std::path::{Path, PathBuf},
};

struct LoadedLibrary {
    path: PathBuf,
    ctx: Pkcs11,
}

/// A slot with a readable token, tagged with the library it came from.
#[derive(Clone, Debug)]
pub struct SlotRef {
    pub library_index: usize,
    pub slot: Slot,
    pub token_label: String,
    pub manufacturer: String,
    pub model: String,
}

impl std::fmt::Display for SlotRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (slot {})", self.token_label, self.slot.id())
    }
}

/// Heuristic filter for signing-capable tokens, applied when
/// presenting slots to the operator.
///
/// Known patterns: national eID cards expose a dedicated signature
/// application ("ADVANCED SIGNATURE", "SEMNARE") next to an auth-only
/// "PKI Application" slot; generic devices (SafeNet eToken) are
/// signing-capable throughout. Unknown labels are included.
pub fn is_signing_label(label: &str) -> bool {
    let upper = label.trim().to_uppercase();

    if ["SIGNATURE", "SEMNARE", "SIGNING", "SIGN"]
        .iter()
        .any(|kw| upper.contains(kw))
    {
        return true;
    }
    if upper.contains("PKI APPLICATION") {
        return false;
    }
    true
}

pub struct TokenManager {
    libraries: Vec<LoadedLibrary>,
}

impl TokenManager {
    /// Load every library that exists and initializes; failures are
    /// logged and skipped. The caller decides whether zero loaded
    /// libraries is fatal.
    pub fn load(paths: &[PathBuf]) -> Self {
        let mut libraries = Vec::new();

        for path in paths {
            if !path.exists() {
                continue;
            }
            match Self::load_one(path) {
                Ok(ctx) => {
                    log::info!("loaded PKCS#11 library: {}", path.display());
                    libraries.push(LoadedLibrary {
                        path: path.clone(),
                        ctx,
                    });
                }
                Err(e) => {
                    log::warn!("skipping PKCS#11 library {}: {e}", path.display());
                }
            }
        }

        if libraries.is_empty() {
            log::warn!("no PKCS#11 library could be loaded");
        }
        Self { libraries }
    }

    fn load_one(path: &Path) -> Result<Pkcs11, TokenError> {
        let ctx = Pkcs11::new(path)?;
        ctx.initialize(CInitializeArgs::new(CInitializeFlags::OS_LOCKING_OK))?;
        Ok(ctx)
    }

    pub fn loaded_count(&self) -> usize {
        self.libraries.len()
    }

    pub fn library_paths(&self) -> impl Iterator<Item = &Path> {
        self.libraries.iter().map(|l| l.path.as_path())
    }

    /// Merge token-bearing slots from every loaded library. Slots
    /// whose token info cannot be read are skipped with a warning.
    pub fn enumerate_slots(&self) -> Vec<SlotRef> {
        let mut slots = Vec::new();

        for (library_index, lib) in self.libraries.iter().enumerate() {
            let lib_slots = match lib.ctx.get_slots_with_token() {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("slot enumeration failed for {}: {e}", lib.path.display());
                    continue;
                }
            };

            for slot in lib_slots {
                match lib.ctx.get_token_info(slot) {
                    Ok(info) => slots.push(SlotRef {
                        library_index,
                        slot,
                        token_label: info.label().trim().to_string(),
                        manufacturer: info.manufacturer_id().trim().to_string(),
                        model: info.model().trim().to_string(),
                    }),
                    Err(e) => {
                        log::warn!("skipping unreadable token in slot {}: {e}", slot.id());
                    }
                }
            }
        }

        log::info!("found {} slot(s) with tokens", slots.len());
        slots
    }

    /// Open an authenticated user session on the given slot. The
    /// session closes (and logs out) on drop.
    pub fn open_session(&self, slot: &SlotRef, pin: &str) -> Result<Session, TokenError> {
        let lib = self
            .libraries
            .get(slot.library_index)
            .ok_or_else(|| TokenError::Pkcs11("stale slot reference".to_string()))?;

        log::info!("opening session on token: {}", slot.token_label);
        let session = lib.ctx.open_ro_session(slot.slot)?;
        session.login(UserType::User, Some(&AuthPin::new(pin.to_string().into())))?;
        log::info!("session opened and authenticated");
        Ok(session)
    }
}
