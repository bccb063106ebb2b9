//! Subdomain generation
//!
//! Tokens are fixed-length lowercase alphanumerics with the first
//! character forced alphabetic (a leading digit makes an awkward DNS
//! label). Uniqueness is collision-checked against the store with
//! bounded retry, escalating to a longer token on exhaustion; the
//! store's own uniqueness enforcement is the backstop for races between
//! concurrent generators.

use tracing::debug;

use crate::errors::EngineError;
use crate::store::DeploymentStore;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Subdomain generation options
#[derive(Debug, Clone)]
pub struct SubdomainOptions {
    /// Token length
    pub length: usize,

    /// Collision retries before escalating to a longer token
    pub max_attempts: u32,

    /// Extra characters appended on escalation
    pub escalation: usize,
}

impl Default for SubdomainOptions {
    fn default() -> Self {
        Self {
            length: 8,
            max_attempts: 5,
            escalation: 4,
        }
    }
}

/// A usable subdomain label: 3-32 lowercase alphanumerics, first
/// character alphabetic
pub fn is_valid_label(label: &str) -> bool {
    (3..=32).contains(&label.len())
        && label
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() && c.is_ascii_alphabetic())
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// Produce one random token of `length` characters
pub fn random_token(length: usize) -> String {
    let mut token = String::with_capacity(length);
    let mut entropy = Vec::with_capacity(length);
    while entropy.len() < length {
        entropy.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    }
    for (i, byte) in entropy.into_iter().take(length).enumerate() {
        let c = if i == 0 {
            LETTERS[byte as usize % LETTERS.len()]
        } else {
            ALPHABET[byte as usize % ALPHABET.len()]
        };
        token.push(c as char);
    }
    token
}

/// Generate a globally unique subdomain
pub async fn generate(
    store: &dyn DeploymentStore,
    options: &SubdomainOptions,
) -> Result<String, EngineError> {
    for attempt in 0..options.max_attempts {
        let token = random_token(options.length);
        if !store.subdomain_taken(&token).await? {
            return Ok(token);
        }
        debug!("subdomain {} taken (attempt {})", token, attempt + 1);
    }

    // Escalate once to a longer token before giving up
    let token = random_token(options.length + options.escalation);
    if !store.subdomain_taken(&token).await? {
        return Ok(token);
    }

    Err(EngineError::Internal(
        "could not generate a unique subdomain".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deployment::Deployment;
    use crate::store::memory::MemoryDeploymentStore;

    #[test]
    fn test_token_shape() {
        for _ in 0..200 {
            let token = random_token(8);
            assert_eq!(token.len(), 8);
            assert!(token.chars().next().unwrap().is_ascii_lowercase());
            assert!(token
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_tokens_differ() {
        let a = random_token(8);
        let b = random_token(8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_label_validation() {
        assert!(is_valid_label("demo1234"));
        assert!(is_valid_label("abc"));
        assert!(!is_valid_label("ab"));
        assert!(!is_valid_label("1demo"));
        assert!(!is_valid_label("Demo"));
        assert!(!is_valid_label("demo-app"));
    }

    #[tokio::test]
    async fn test_generate_skips_taken_subdomains() {
        let store = MemoryDeploymentStore::new();
        let existing = Deployment::new("user-1", random_token(8));
        let taken = existing.subdomain.clone();
        store.insert(existing).await.unwrap();

        let options = SubdomainOptions::default();
        let generated = generate(&store, &options).await.unwrap();
        assert_ne!(generated, taken);
    }

    #[tokio::test]
    async fn test_concurrent_generation_never_collides() {
        use std::sync::Arc;

        let store = Arc::new(MemoryDeploymentStore::new());
        let options = SubdomainOptions::default();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let options = options.clone();
            handles.push(tokio::spawn(async move {
                let subdomain = generate(store.as_ref(), &options).await.unwrap();
                // The store's uniqueness check is the racing backstop
                store
                    .insert(Deployment::new(format!("user-{}", i), subdomain))
                    .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(store.list_all().await.unwrap().len(), 16);
    }
}
