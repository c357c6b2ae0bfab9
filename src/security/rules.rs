//! Rule tables for payload and behavior detection.
//!
//! Patterns are plain strings compiled once when the detectors are built;
//! a pattern that fails to compile is logged and skipped.

use crate::config::DetectionConfig;
use crate::security::verdict::AttackType;
use regex::Regex;
use tracing::warn;

/// Category rules in registration order.
pub struct RuleCategory {
    pub attack_type: AttackType,
    pub patterns: &'static [&'static str],
}

pub const PAYLOAD_RULES: &[RuleCategory] = &[
    RuleCategory {
        attack_type: AttackType::SqlInjection,
        patterns: &[
            r"(?i)(union\s+select|select\s+.*\s+from|insert\s+into|delete\s+from|update\s+.*\s+set|drop\s+table|exec\s*\(|execute\s*\(|xp_cmdshell)",
            r#"(?i)(or\s+1\s*=\s*1|or\s+'1'\s*=\s*'1'|or\s+"1"\s*=\s*"1")"#,
            r"(?i)'\s*or\s+'[^']*'\s*=\s*'",
            r"(?i)(;.*--|;.*#|/\*.*\*/|--\s|/\*|\*/)",
            r"(?i)(benchmark\s*\(|sleep\s*\(|waitfor\s+delay)",
            r"(?i)(information_schema|sys\.tables|pg_tables|mysql\.user)",
        ],
    },
    RuleCategory {
        attack_type: AttackType::Xss,
        patterns: &[
            r"(?i)(<script[^>]*>.*?</script>|<script[^>]*>|javascript:)",
            r"(?i)(onerror\s*=|onload\s*=|onclick\s*=|onmouseover\s*=)",
            r"(?i)(<iframe|<embed|<object|<img[^>]*onerror)",
            r"(?i)(eval\s*\(|alert\s*\(|prompt\s*\(|confirm\s*\()",
            r"(?i)(document\.cookie|document\.write|window\.location)",
        ],
    },
    RuleCategory {
        attack_type: AttackType::CommandInjection,
        patterns: &[
            r"(?i)(;.*\||;.*&|;.*`|;.*\$\(|;.*\$\{)",
            r"(?i)(\|\s*sh|\|\s*bash|\|\s*cmd|;.*cat|;.*ls|;.*pwd)",
            r"(?i)(\$\{IFS\}|%20|%09|\s+cat|\s+ls|\s+rm)",
            r"(?i)(nc\s+-l|nc\s+-e|wget\s+|curl\s+|ping\s+-c)",
            r"(?i)(/bin/sh|/bin/bash|cmd\.exe|powershell)",
        ],
    },
    RuleCategory {
        attack_type: AttackType::PathTraversal,
        patterns: &[
            r"(\.\./|\.\.\\|\.\.%2f|\.\.%5c)",
            r"(?i)(\.\./\.\./|\.\.\\\.\.\\)",
            r"(?i)(%2e%2e%2f|%2e%2e%5c)",
            r"(?i)(\.\.%252f|\.\.%255c)",
            r"(?i)(/etc/passwd|/etc/shadow|/windows/system32|boot\.ini)",
        ],
    },
    RuleCategory {
        attack_type: AttackType::LfiRfi,
        patterns: &[
            r"(?i)(include\s*\(|require\s*\(|include_once|require_once)",
            r"(?i)(php://|file://|data://|expect://|phar://)",
            r"(?i)(http://|https://|ftp://|file://).*\.(php|jsp|asp|aspx)",
            r"(?i)(\.\./\.\./\.\./|\.\.\\\.\.\\\.\.\\)",
            r"(?i)(/etc/passwd|/proc/self/environ|/windows/win\.ini)",
        ],
    },
    RuleCategory {
        attack_type: AttackType::Ssrf,
        patterns: &[
            r"(?i)(http://127\.0\.0\.1|http://localhost|http://0\.0\.0\.0)",
            r"(?i)(http://169\.254\.169\.254|http://10\.0\.0\.0|http://192\.168\.)",
            r"(?i)(file://|gopher://|dict://|ldap://)",
            r"(?i)(curl\s+|wget\s+|fetch\s+|http_get)",
        ],
    },
    RuleCategory {
        attack_type: AttackType::WebFuzzing,
        patterns: &[
            r"(?i)(admin|test|backup|old|dev|staging|\.bak|\.old|\.tmp)",
            r"(?i)(\.git|\.svn|\.env|\.DS_Store|\.htaccess|\.htpasswd)",
            r"(?i)(wp-admin|wp-content|wp-includes|wp-config)",
            r"(?i)(/api/v1/|/api/v2/|/rest/|/graphql/)",
        ],
    },
    RuleCategory {
        attack_type: AttackType::Enumeration,
        patterns: &[
            r"(?i)(id=\d+|page=\d+|offset=\d+|limit=\d+)",
            r"(?i)(/users/|/admin/|/api/users|/api/admin)",
            r"(?i)(username=|email=|user=|account=)",
            r"(?i)(\.json|\.xml|\.yaml|\.yml|format=json|format=xml)",
        ],
    },
];

/// Indicator substrings used to label a corpus hit, in priority order.
pub const LITERAL_INDICATORS: &[(AttackType, &[&str])] = &[
    (
        AttackType::SqlInjection,
        &["union select", "select from", "insert into", "drop table", "' or '", "or 1=1", "'1'='1"],
    ),
    (AttackType::Xss, &["<script", "javascript:", "onerror=", "onload="]),
    (AttackType::CommandInjection, &["; sh", "; bash", "| cat", "| ls", "/bin/sh"]),
    (AttackType::PathTraversal, &["../", "..\\", "/etc/passwd", "boot.ini"]),
    (AttackType::LfiRfi, &["include(", "require(", "php://", "file://"]),
    (AttackType::Ssrf, &["127.0.0.1", "localhost", "169.254.169.254"]),
    (AttackType::WebFuzzing, &[".git", ".env", "wp-admin", "admin"]),
    (AttackType::Enumeration, &["id=", "/users/", "username=", "email="]),
];

/// User-agent families: scanner tools, bots, scripted clients, placeholder
/// values and attack words.
pub const SUSPICIOUS_USER_AGENT_PATTERNS: &[&str] = &[
    r"(?i)(sqlmap|nikto|nmap|masscan|zap|burp|w3af|acunetix|nessus|openvas)",
    r"(?i)(bot|crawler|spider|scraper|scanner)",
    r"(?i)(curl|wget|python|java|go-http|libwww)",
    r"(?i)(^$|^-|^\.|^null|^undefined)",
    r"(?i)(test|admin|hack|exploit|payload)",
];

pub const SUSPICIOUS_ENDPOINT_PATTERNS: &[&str] = &[
    r"(?i)(\.\./|\.\.\\|%2e%2e)",
    r"(?i)(admin|test|backup|old|dev|staging)",
    r"(?i)(\.git|\.svn|\.env|\.DS_Store)",
    r"(?i)(wp-admin|wp-content|wp-includes)",
    r"(?i)(/api/v[0-9]+/|/rest/|/graphql/)",
];

pub const ENUMERATION_PATH_PATTERN: &str = r"(?i)(/users/\d+|/api/users/\d+|/id/\d+)";

/// Query keys whose numeric values look like record walking.
pub const ENUMERATION_QUERY_KEYS: &[&str] = &["id", "user_id", "page"];

pub const LOGIN_ENDPOINT_PATTERNS: &[&str] = &[
    r"(?i)(login|signin|auth|authenticate|password|credential)",
    r"(?i)(/api/auth|/api/login|/auth/login)",
];

/// A compiled category rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub attack_type: AttackType,
    pub regex: Regex,
}

/// Compile the rules of every enabled category, keeping registration order.
pub fn compile_payload_rules(detection: &DetectionConfig) -> Vec<CompiledRule> {
    PAYLOAD_RULES
        .iter()
        .filter(|category| category_enabled(detection, category.attack_type))
        .flat_map(|category| {
            compile_patterns(category.patterns)
                .into_iter()
                .map(move |regex| CompiledRule {
                    attack_type: category.attack_type,
                    regex,
                })
        })
        .collect()
}

pub fn category_enabled(detection: &DetectionConfig, attack_type: AttackType) -> bool {
    match attack_type {
        AttackType::SqlInjection => detection.sql_injection,
        AttackType::Xss => detection.xss,
        AttackType::CommandInjection => detection.command_injection,
        AttackType::PathTraversal => detection.path_traversal,
        AttackType::LfiRfi => detection.lfi_rfi,
        AttackType::Ssrf => detection.ssrf,
        AttackType::WebFuzzing => detection.web_fuzzing,
        AttackType::Enumeration => detection.enumeration,
        AttackType::MaliciousPayload | AttackType::MaliciousPattern => true,
    }
}

pub fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(pattern = pattern, error = %e, "Failed to compile detection pattern");
                None
            }
        })
        .collect()
}

/// Label a corpus hit from the literal and the fragment it was found in.
pub fn classify_literal(literal: &str, fragment: &str) -> AttackType {
    let literal = literal.to_lowercase();
    let fragment = fragment.to_lowercase();

    LITERAL_INDICATORS
        .iter()
        .find(|(_, indicators)| {
            indicators
                .iter()
                .any(|indicator| literal.contains(indicator) || fragment.contains(indicator))
        })
        .map(|(attack_type, _)| *attack_type)
        .unwrap_or(AttackType::MaliciousPayload)
}
