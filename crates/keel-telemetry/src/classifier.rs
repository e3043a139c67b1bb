//! Sensitive field and header classification
//!
//! A [`SensitiveFieldSet`] is compiled from one [`PrivacyConfig`] snapshot and
//! never changes afterwards. [`SensitiveFieldCache`] owns the snapshot and swaps
//! it atomically on [`SensitiveFieldCache::reload`]; readers never take a lock.

use crate::config::PrivacyConfig;
use arc_swap::{ArcSwap, ArcSwapOption};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Canonical secret-like stems matched against field names (case-insensitive).
///
/// Short stems that commonly appear inside harmless words (`pin` in `shipping`,
/// `auth` in `author`) only match on a word boundary.
const BUILTIN_FIELD_PATTERNS: &[&str] = &[
    r"(?i)password",
    r"(?i)passwd",
    r"(?i)passphrase",
    r"(?i)(?:^|[^a-z0-9])pwd(?:$|[^a-z0-9])",
    r"(?i)secret",
    r"(?i)token",
    r"(?i)api[_\-.]?key",
    r"(?i)access[_\-.]?key",
    r"(?i)private[_\-.]?key",
    r"(?i)signing[_\-.]?key",
    r"(?i)encryption[_\-.]?key",
    r"(?i)master[_\-.]?key",
    r"(?i)(?:^|[^a-z0-9])auth(?:$|[^a-z0-9])",
    r"(?i)authorization",
    r"(?i)bearer",
    r"(?i)credential",
    r"(?i)cookie",
    r"(?i)session[_\-.]?(?:id|key)",
    r"(?i)csrf",
    r"(?i)xsrf",
    r"(?i)(?:^|[^a-z0-9])jwt(?:$|[^a-z0-9])",
    r"(?i)(?:^|[^a-z0-9])otp(?:$|[^a-z0-9])",
    r"(?i)(?:^|[^a-z0-9])pin(?:$|[^a-z0-9])",
    r"(?i)(?:^|[^a-z0-9])cvv2?(?:$|[^a-z0-9])",
    r"(?i)(?:^|[^a-z0-9])cvc(?:$|[^a-z0-9])",
    r"(?i)card[_\-.]?num",
    r"(?i)credit[_\-.]?card",
    r"(?i)(?:^|[^a-z0-9])cc[_\-.]?num",
    r"(?i)(?:^|[^a-z0-9])pan(?:$|[^a-z0-9])",
    r"(?i)(?:^|[^a-z0-9])ssn(?:$|[^a-z0-9])",
    r"(?i)social[_\-.]?security",
    r"(?i)tax[_\-.]?id",
    r"(?i)bank[_\-.]?account",
    r"(?i)account[_\-.]?number",
    r"(?i)routing[_\-.]?number",
    r"(?i)(?:^|[^a-z0-9])iban(?:$|[^a-z0-9])",
    r"(?i)signature",
    r"(?i)(?:^|[^a-z0-9])salt(?:$|[^a-z0-9])",
    r"(?i)connection[_\-.]?string",
    r"(?i)database[_\-.]?url",
    r"(?i)(?:^|[^a-z0-9])dsn(?:$|[^a-z0-9])",
];

/// HTTP headers that carry credentials.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    "x-api-key",
    "x-auth-token",
    "x-csrf-token",
];

static BUILTIN_FIELDS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(BUILTIN_FIELD_PATTERNS).expect("built-in sensitive field patterns compile")
});

static GLOBAL_CACHE: Lazy<SensitiveFieldCache> =
    Lazy::new(|| SensitiveFieldCache::new(PrivacyConfig::default()));

/// Immutable classification state compiled from one privacy configuration.
#[derive(Debug)]
pub struct SensitiveFieldSet {
    operator_fields: Vec<String>,
    additional: Option<RegexSet>,
    excluded: HashSet<String>,
    value_patterns: Vec<Regex>,
    max_depth: usize,
    marker: String,
}

impl SensitiveFieldSet {
    /// Compile a set, returning it with the patterns that failed to compile.
    ///
    /// Invalid operator patterns are skipped rather than failing classification.
    pub fn compile(config: &PrivacyConfig) -> (Self, Vec<String>) {
        let mut rejected = Vec::new();

        let additional: Vec<String> = config
            .additional_sensitive_patterns
            .iter()
            .filter_map(|pattern| {
                let pattern = format!("(?i){}", pattern);
                match Regex::new(&pattern) {
                    Ok(_) => Some(pattern),
                    Err(_) => {
                        rejected.push(pattern);
                        None
                    }
                }
            })
            .collect();

        let value_patterns = if config.sensitive_value_detection {
            config
                .value_patterns
                .iter()
                .filter_map(|pattern| match Regex::new(pattern) {
                    Ok(regex) => Some(regex),
                    Err(_) => {
                        rejected.push(pattern.clone());
                        None
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        let set = Self {
            operator_fields: config
                .sensitive_fields
                .iter()
                .map(|field| field.trim().to_lowercase())
                .filter(|field| !field.is_empty())
                .collect(),
            additional: if additional.is_empty() {
                None
            } else {
                RegexSet::new(&additional).ok()
            },
            excluded: config
                .excluded_fields
                .iter()
                .map(|field| field.to_lowercase())
                .collect(),
            value_patterns,
            max_depth: config.max_depth,
            marker: config.redaction_marker.clone(),
        };

        (set, rejected)
    }

    /// Check if a field name should be redacted
    pub fn is_sensitive(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        let needs_lowercase = !self.excluded.is_empty() || !self.operator_fields.is_empty();
        let lowered = if needs_lowercase {
            name.to_lowercase()
        } else {
            String::new()
        };

        if self.excluded.contains(&lowered) {
            return false;
        }

        BUILTIN_FIELDS.is_match(name)
            || self
                .operator_fields
                .iter()
                .any(|field| lowered.contains(field.as_str()))
            || self
                .additional
                .as_ref()
                .map_or(false, |set| set.is_match(name))
    }

    /// Replace secret-looking spans inside a string value.
    ///
    /// Returns `None` when value detection is disabled or nothing matched.
    pub fn scan_value(&self, value: &str) -> Option<String> {
        if self.value_patterns.is_empty() {
            return None;
        }

        let mut scanned = value.to_string();
        let mut matched = false;
        for pattern in &self.value_patterns {
            if pattern.is_match(&scanned) {
                matched = true;
                scanned = pattern
                    .replace_all(&scanned, self.marker.as_str())
                    .into_owned();
            }
        }

        matched.then_some(scanned)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

/// Lazily compiled, atomically swapped [`SensitiveFieldSet`].
pub struct SensitiveFieldCache {
    config: ArcSwap<PrivacyConfig>,
    compiled: ArcSwapOption<SensitiveFieldSet>,
    rebuild: Mutex<()>,
}

impl SensitiveFieldCache {
    pub fn new(config: PrivacyConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            compiled: ArcSwapOption::empty(),
            rebuild: Mutex::new(()),
        }
    }

    /// The process-wide cache used by the free classification functions.
    pub fn global() -> &'static SensitiveFieldCache {
        &GLOBAL_CACHE
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<PrivacyConfig> {
        self.config.load_full()
    }

    /// Current compiled set, compiling it first if a reload dropped it.
    pub fn current(&self) -> Arc<SensitiveFieldSet> {
        if let Some(set) = self.compiled.load_full() {
            return set;
        }

        let rejected;
        let set = {
            let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(set) = self.compiled.load_full() {
                return set;
            }

            let (set, invalid) = SensitiveFieldSet::compile(&self.config.load());
            let set = Arc::new(set);
            self.compiled.store(Some(Arc::clone(&set)));
            rejected = invalid;
            set
        };

        for pattern in rejected {
            tracing::warn!(
                telemetry.event = "invalid_redaction_pattern",
                pattern = %pattern,
                "Skipping redaction pattern that does not compile"
            );
        }

        set
    }

    /// Replace the configuration snapshot; the next read recompiles.
    pub fn reload(&self, config: PrivacyConfig) {
        let _guard = self.rebuild.lock().unwrap_or_else(|e| e.into_inner());
        self.config.store(Arc::new(config));
        self.compiled.store(None);
    }

    pub fn is_sensitive_field(&self, name: &str) -> bool {
        self.current().is_sensitive(name)
    }
}

impl Default for SensitiveFieldCache {
    fn default() -> Self {
        Self::new(PrivacyConfig::default())
    }
}

/// Check a field name against the process-wide sensitive field set.
pub fn is_sensitive_field(name: &str) -> bool {
    SensitiveFieldCache::global().is_sensitive_field(name)
}

/// Check an HTTP header name against the fixed credential header set.
pub fn is_sensitive_header(name: &str) -> bool {
    let name = name.trim();
    SENSITIVE_HEADERS
        .iter()
        .any(|header| header.eq_ignore_ascii_case(name))
}

/// Swap the process-wide classification configuration.
pub fn reload(config: PrivacyConfig) {
    SensitiveFieldCache::global().reload(config);
    tracing::debug!(
        telemetry.event = "sensitive_fields_reloaded",
        "Sensitive field configuration reloaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> SensitiveFieldSet {
        SensitiveFieldSet::compile(&PrivacyConfig::default()).0
    }

    #[test]
    fn test_builtin_patterns_match_case_insensitively() {
        let set = builtin();
        for name in [
            "password",
            "PASSWORD",
            "user_password",
            "Passwd",
            "pwd",
            "client_secret",
            "access_token",
            "refreshToken",
            "api_key",
            "X-Api-Key",
            "apikey",
            "aws_access_key_id",
            "private_key",
            "auth",
            "Authorization",
            "bearer",
            "db_credentials",
            "session_id",
            "csrf_token",
            "jwt",
            "otp",
            "pin",
            "card_pin",
            "cvv",
            "card_number",
            "creditCard",
            "ssn",
            "social_security_number",
            "tax_id",
            "bank_account",
            "iban",
            "webhook_signature",
            "database_url",
        ] {
            assert!(set.is_sensitive(name), "{} should be sensitive", name);
        }
    }

    #[test]
    fn test_common_names_are_not_sensitive() {
        let set = builtin();
        for name in [
            "",
            "username",
            "user_id",
            "email",
            "method",
            "path",
            "status_code",
            "duration_ms",
            "author",
            "shipping_address",
            "mapping",
            "spinner",
            "company",
            "session",
            "description",
            "request_id",
            "correlation_id",
            "error_type",
            "error_message",
            "error_attributes",
            "ünïcödé_name",
        ] {
            assert!(!set.is_sensitive(name), "{} should not be sensitive", name);
        }
    }

    #[test]
    fn test_operator_fields_use_substring_match() {
        let config = PrivacyConfig {
            sensitive_fields: vec!["Tenant_Ref".to_string(), "  ".to_string()],
            ..PrivacyConfig::default()
        };
        let (set, rejected) = SensitiveFieldSet::compile(&config);

        assert!(rejected.is_empty());
        assert!(set.is_sensitive("primary_tenant_ref_id"));
        assert!(!set.is_sensitive("tenant"));
    }

    #[test]
    fn test_excluded_fields_and_additional_patterns() {
        let config = PrivacyConfig {
            excluded_fields: vec!["token_count".to_string()],
            additional_sensitive_patterns: vec![r"^internal_".to_string(), "[bad".to_string()],
            ..PrivacyConfig::default()
        };
        let (set, rejected) = SensitiveFieldSet::compile(&config);

        assert_eq!(rejected.len(), 1);
        assert!(!set.is_sensitive("TOKEN_COUNT"));
        assert!(set.is_sensitive("token"));
        assert!(set.is_sensitive("Internal_note"));
        assert!(!set.is_sensitive("note_internal"));
    }

    #[test]
    fn test_value_scanning_only_when_enabled() {
        assert!(builtin().scan_value("card 4532-1234-5678-9012").is_none());

        let config = PrivacyConfig {
            sensitive_value_detection: true,
            ..PrivacyConfig::default()
        };
        let (set, _) = SensitiveFieldSet::compile(&config);
        let scanned = set.scan_value("charged card 4532-1234-5678-9012 ok").unwrap();

        assert_eq!(scanned, "charged card [REDACTED] ok");
        assert!(set.scan_value("nothing to see").is_none());
    }

    #[test]
    fn test_sensitive_headers() {
        for name in [
            "Authorization",
            "cookie",
            "Set-Cookie",
            "PROXY-AUTHORIZATION",
            "x-api-key",
            "X-Auth-Token",
            "x-csrf-token",
        ] {
            assert!(is_sensitive_header(name), "{} should be sensitive", name);
        }
        assert!(!is_sensitive_header("content-type"));
        assert!(!is_sensitive_header("x-request-id"));
    }

    #[test]
    fn test_cache_reload_swaps_snapshot() {
        let cache = SensitiveFieldCache::default();
        let before = cache.current();
        assert!(!cache.is_sensitive_field("account_alias"));

        cache.reload(PrivacyConfig {
            sensitive_fields: vec!["alias".to_string()],
            ..PrivacyConfig::default()
        });

        assert!(cache.is_sensitive_field("account_alias"));
        assert!(!Arc::ptr_eq(&before, &cache.current()));
        assert!(!before.is_sensitive("account_alias"));
    }

    #[test]
    fn test_cache_is_shared_across_threads() {
        let cache = Arc::new(SensitiveFieldCache::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    if i == 0 {
                        cache.reload(PrivacyConfig::default());
                    }
                    (0..100).all(|_| cache.is_sensitive_field("password"))
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
