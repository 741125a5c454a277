//! User accounts and their roles.
//!
//! On the wire a user travels as a [`UsuarioSyncDto`], with roles flattened
//! to their names and the password hash copied verbatim. Decoding resolves
//! each role name to a local [`Authority`], creating missing ones, and flags
//! the password as already encoded so the store does not hash it again.

use std::num::NonZeroU32;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use relaysync_core::resolver::normalize_key;
use relaysync_core::{
    EntityId, EntityStore, OperationContext, StoreError, StoreResult, SyncEntity, SyncError,
};
use ring::{pbkdf2, rand as ring_rand};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::MemoryStore;

/// Number of PBKDF2 iterations for password hashing
const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LENGTH: usize = 16;
const CREDENTIAL_LENGTH: usize = 32;
/// Marks an encoded password.
const ENCODED_PREFIX: &str = "{pbkdf2}";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub id: Option<EntityId>,
    pub name: Option<String>,
}

impl Authority {
    pub fn named(name: &str) -> Self {
        Self {
            id: None,
            name: Some(name.to_string()),
        }
    }
}

impl SyncEntity for Authority {
    const TYPE_NAME: &'static str = "Authority";
    const NATURAL_KEYS: &'static [&'static str] = &["name"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn unique_key(&self) -> Option<String> {
        self.name.as_deref().map(normalize_key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usuario {
    pub id: Option<EntityId>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub authorities: Vec<Authority>,
    pub totp_secret: Option<String>,
    pub two_factor_enabled: Option<bool>,
    pub account_verified: Option<bool>,
    /// Set on records decoded from a peer; cleared once stored.
    #[serde(default)]
    pub skip_password_encoding: bool,
}

/// Wire projection of a [`Usuario`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsuarioSyncDto {
    pub id: Option<EntityId>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub authorities: Vec<String>,
    pub totp_secret: Option<String>,
    #[serde(default)]
    pub two_factor_enabled: bool,
    #[serde(default)]
    pub account_verified: bool,
}

impl From<&Usuario> for UsuarioSyncDto {
    fn from(usuario: &Usuario) -> Self {
        Self {
            id: usuario.id,
            username: usuario.username.clone(),
            password: usuario.password.clone(),
            authorities: usuario
                .authorities
                .iter()
                .filter_map(|a| a.name.clone())
                .collect(),
            totp_secret: usuario.totp_secret.clone(),
            two_factor_enabled: usuario.two_factor_enabled.unwrap_or(false),
            account_verified: usuario.account_verified.unwrap_or(false),
        }
    }
}

impl SyncEntity for Usuario {
    const TYPE_NAME: &'static str = "Usuario";
    const NATURAL_KEYS: &'static [&'static str] = &["username"];

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn unique_key(&self) -> Option<String> {
        self.username.as_deref().map(normalize_key)
    }

    fn to_wire(&self) -> serde_json::Result<Value> {
        serde_json::to_value(UsuarioSyncDto::from(self))
    }
}

/// Rebuild a [`Usuario`] from its wire form, resolving or creating its roles.
pub fn usuario_decoder(
    authorities: Arc<MemoryStore<Authority>>,
) -> impl Fn(Value) -> relaysync_core::Result<Usuario> + Send + Sync + 'static {
    move |payload: Value| {
        let dto: UsuarioSyncDto = serde_json::from_value(payload)
            .map_err(|e| SyncError::json("Usuario payload", e))?;

        let username = dto
            .username
            .as_deref()
            .map(normalize_key)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SyncError::invalid_record(Usuario::TYPE_NAME, "username is required"))?;
        let password = dto
            .password
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| SyncError::invalid_record(Usuario::TYPE_NAME, "password is required"))?;

        let roles = dto
            .authorities
            .iter()
            .map(|name| resolve_authority(&authorities, name))
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(Usuario {
            id: dto.id,
            username: Some(username),
            password: Some(password),
            authorities: roles,
            totp_secret: dto.totp_secret,
            two_factor_enabled: Some(dto.two_factor_enabled),
            account_verified: Some(dto.account_verified),
            skip_password_encoding: true,
        })
    }
}

fn resolve_authority(store: &MemoryStore<Authority>, name: &str) -> StoreResult<Authority> {
    match store.find_by_natural_key("name", name)? {
        Some(existing) => Ok(existing),
        None => store.save(&OperationContext::new(), Authority::named(name.trim())),
    }
}

/// Store hook: hash plain-text passwords unless the record says they are already encoded.
pub fn encode_password_on_save(usuario: &mut Usuario) -> StoreResult<()> {
    if std::mem::take(&mut usuario.skip_password_encoding) {
        return Ok(());
    }
    if let Some(password) = usuario.password.as_deref() {
        if !is_encoded(password) {
            usuario.password = Some(encode_password(password)?);
        }
    }
    if let Some(username) = usuario.username.as_deref() {
        usuario.username = Some(normalize_key(username));
    }
    Ok(())
}

pub fn is_encoded(password: &str) -> bool {
    password.starts_with(ENCODED_PREFIX)
}

/// Hash a password for storage as `{pbkdf2}` + base64(salt + derived key).
pub fn encode_password(password: &str) -> StoreResult<String> {
    let rng = ring_rand::SystemRandom::new();

    let mut salt = [0u8; SALT_LENGTH];
    ring_rand::SecureRandom::fill(&rng, &mut salt)
        .map_err(|_| StoreError::Backend("failed to generate salt".to_string()))?;

    let mut derived_key = [0u8; CREDENTIAL_LENGTH];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations(),
        &salt,
        password.as_bytes(),
        &mut derived_key,
    );

    let mut combined = Vec::with_capacity(SALT_LENGTH + CREDENTIAL_LENGTH);
    combined.extend_from_slice(&salt);
    combined.extend_from_slice(&derived_key);

    Ok(format!("{}{}", ENCODED_PREFIX, URL_SAFE_NO_PAD.encode(&combined)))
}

/// Check `password` against a value produced by [`encode_password`].
pub fn verify_password(encoded: &str, password: &str) -> bool {
    let Some(encoded) = encoded.strip_prefix(ENCODED_PREFIX) else {
        return false;
    };
    let Ok(stored) = URL_SAFE_NO_PAD.decode(encoded) else {
        return false;
    };
    if stored.len() != SALT_LENGTH + CREDENTIAL_LENGTH {
        return false;
    }
    let (salt, stored_hash) = stored.split_at(SALT_LENGTH);
    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations(),
        salt,
        password.as_bytes(),
        stored_hash,
    )
    .is_ok()
}

fn iterations() -> NonZeroU32 {
    NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn password_hashing_round_trip() {
        let encoded = encode_password("s3creto").expect("encode");
        assert!(is_encoded(&encoded));
        assert!(verify_password(&encoded, "s3creto"));
        assert!(!verify_password(&encoded, "otro"));
        assert!(!verify_password("s3creto", "s3creto"));
    }

    #[test]
    fn wire_form_flattens_roles() {
        let usuario = Usuario {
            id: Some(3),
            username: Some("ana".into()),
            password: Some("{pbkdf2}abc".into()),
            authorities: vec![Authority::named("ROLE_ADMIN"), Authority::named("ROLE_USER")],
            ..Usuario::default()
        };
        let wire = usuario.to_wire().expect("wire");
        assert_eq!(wire["authorities"], json!(["ROLE_ADMIN", "ROLE_USER"]));
        assert_eq!(wire["password"], "{pbkdf2}abc");
        assert!(wire.get("skipPasswordEncoding").is_none());
    }

    #[test]
    fn decoder_resolves_and_creates_roles() {
        let authorities = Arc::new(MemoryStore::<Authority>::new());
        let existing = authorities
            .save(&OperationContext::new(), Authority::named("ROLE_USER"))
            .expect("save");
        let decode = usuario_decoder(authorities.clone());

        let usuario = decode(json!({
            "username": "  Ana ",
            "password": "{pbkdf2}abc",
            "authorities": ["role_user", "ROLE_ADMIN"]
        }))
        .expect("decode");

        assert_eq!(usuario.username.as_deref(), Some("ana"));
        assert!(usuario.skip_password_encoding);
        assert_eq!(usuario.authorities[0], existing);
        assert_eq!(usuario.authorities[1].name.as_deref(), Some("ROLE_ADMIN"));
        assert_eq!(authorities.len(), 2);
    }

    #[test]
    fn decoder_requires_password() {
        let decode = usuario_decoder(Arc::new(MemoryStore::new()));
        let err = decode(json!({"username": "ana"})).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRecord { .. }));
    }

    #[test]
    fn hook_respects_skip_flag() {
        let mut imported = Usuario {
            password: Some("peer-hash".into()),
            skip_password_encoding: true,
            ..Usuario::default()
        };
        encode_password_on_save(&mut imported).expect("hook");
        assert_eq!(imported.password.as_deref(), Some("peer-hash"));
        assert!(!imported.skip_password_encoding);

        let mut local = Usuario {
            username: Some("Bob".into()),
            password: Some("plain".into()),
            ..Usuario::default()
        };
        encode_password_on_save(&mut local).expect("hook");
        assert!(verify_password(local.password.as_deref().unwrap(), "plain"));
        assert_eq!(local.username.as_deref(), Some("bob"));

        let hashed = local.password.clone();
        encode_password_on_save(&mut local).expect("hook");
        assert_eq!(local.password, hashed);
    }
}
