use crate::config::{CorpusConfig, DetectionConfig};
use crate::security::request::{truncate_bytes, RequestDescriptor};
use crate::security::rules::{classify_literal, compile_payload_rules, CompiledRule};
use crate::security::verdict::AttackType;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const MAX_MATCHED_PAYLOAD: usize = 256;

/// Outcome of a payload scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub is_malicious: bool,
    pub attack_type: Option<AttackType>,
    pub matched_payload: Option<String>,
}

impl Detection {
    pub fn clean() -> Self {
        Self {
            is_malicious: false,
            attack_type: None,
            matched_payload: None,
        }
    }

    /// Detected result; the payload is cut to 256 bytes on a char boundary.
    pub fn detected(attack_type: AttackType, payload: &str) -> Self {
        Self {
            is_malicious: true,
            attack_type: Some(attack_type),
            matched_payload: Some(truncate_bytes(payload, MAX_MATCHED_PAYLOAD)),
        }
    }
}

/// Literal corpus plus compiled category rules. Immutable after construction.
pub struct PayloadDetector {
    case_sensitive: bool,
    literals: Vec<String>,
    automaton: Option<AhoCorasick>,
    rules: Vec<CompiledRule>,
    files_loaded: usize,
    corpus_available: bool,
}

impl PayloadDetector {
    pub fn new(corpus: &CorpusConfig, detection: &DetectionConfig) -> Self {
        let (literals, files_loaded, corpus_available) = if corpus.enabled {
            load_corpus(Path::new(&corpus.path), corpus.case_sensitive)
        } else {
            info!("Payload corpus disabled");
            (Vec::new(), 0, false)
        };

        let mut detector = Self::from_literals(literals, corpus.case_sensitive, detection);
        detector.files_loaded = files_loaded;
        detector.corpus_available = corpus_available;
        detector
    }

    /// Build from an in-memory corpus. If the literal automaton cannot be
    /// built the detector keeps running on the category rules alone.
    pub fn from_literals(literals: Vec<String>, case_sensitive: bool, detection: &DetectionConfig) -> Self {
        let literals: Vec<String> = literals
            .into_iter()
            .map(|literal| literal.trim().to_string())
            .filter(|literal| !literal.is_empty())
            .map(|literal| if case_sensitive { literal } else { literal.to_lowercase() })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let automaton = build_automaton(&literals);

        let rules = compile_payload_rules(detection);

        info!(
            payloads = literals.len(),
            patterns = rules.len(),
            "Payload detector initialized"
        );

        Self {
            case_sensitive,
            literals,
            automaton,
            rules,
            files_loaded: 0,
            corpus_available: true,
        }
    }

    /// Whether corpus literals take part in detection.
    pub fn literal_matching(&self) -> bool {
        self.automaton.is_some()
    }

    pub fn payload_count(&self) -> usize {
        self.literals.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.rules.len()
    }

    pub fn files_loaded(&self) -> usize {
        self.files_loaded
    }

    /// False when the corpus directory was configured but missing.
    pub fn corpus_available(&self) -> bool {
        self.corpus_available
    }

    pub fn detect(&self, request: &RequestDescriptor) -> Detection {
        let fragments = self.fragments(request);

        if let Some(automaton) = &self.automaton {
            for fragment in &fragments {
                if let Some(found) = automaton.find(fragment.as_str()) {
                    let literal = &self.literals[found.pattern().as_usize()];
                    let attack_type = classify_literal(literal, fragment);
                    debug!(attack_type = %attack_type, "Corpus literal matched");
                    return Detection::detected(attack_type, literal);
                }
            }
        }

        for rule in &self.rules {
            for fragment in &fragments {
                if let Some(found) = rule.regex.find(fragment) {
                    debug!(attack_type = %rule.attack_type, "Detection rule matched");
                    return Detection::detected(rule.attack_type, found.as_str());
                }
            }
        }

        Detection::clean()
    }

    /// Searchable views of the request, each followed by its case-folded form
    /// when matching is case-insensitive.
    fn fragments(&self, request: &RequestDescriptor) -> Vec<String> {
        let sources = [
            request.url.clone(),
            request.query_string(),
            request.header_string(),
            request.body.clone(),
            request.effective_user_agent().to_string(),
        ];

        let mut fragments = Vec::with_capacity(sources.len() * 2);
        for source in sources {
            if source.is_empty() {
                continue;
            }
            if !self.case_sensitive {
                let folded = source.to_lowercase();
                fragments.push(source);
                fragments.push(folded);
            } else {
                fragments.push(source);
            }
        }
        fragments
    }
}

fn build_automaton(literals: &[String]) -> Option<AhoCorasick> {
    if literals.is_empty() {
        return None;
    }

    match AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostFirst)
        .build(literals)
    {
        Ok(automaton) => Some(automaton),
        Err(e) => {
            warn!(error = %e, payloads = literals.len(), "Failed to build literal matcher; using detection rules only");
            None
        }
    }
}

/// Recursively read `.txt` files, skipping hidden directories. Returns the
/// literals, the number of files read and whether the directory existed.
fn load_corpus(root: &Path, case_sensitive: bool) -> (Vec<String>, usize, bool) {
    if !root.exists() {
        warn!(path = %root.display(), "Payload corpus path not found; literal matching disabled");
        return (Vec::new(), 0, false);
    }

    let mut literals = Vec::new();
    let mut files_loaded = 0usize;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to read corpus directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');

            if path.is_dir() {
                if !hidden {
                    pending.push(path);
                }
                continue;
            }

            if path.extension().and_then(|ext| ext.to_str()) != Some("txt") {
                continue;
            }

            match fs::read(&path) {
                Ok(bytes) => {
                    let content = String::from_utf8_lossy(&bytes);
                    literals.extend(
                        content
                            .lines()
                            .map(str::trim)
                            .filter(|line| !line.is_empty() && !line.starts_with('#'))
                            .map(|line| if case_sensitive { line.to_string() } else { line.to_lowercase() }),
                    );
                    files_loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load corpus file");
                }
            }
        }
    }

    info!(
        path = %root.display(),
        files = files_loaded,
        payloads = literals.len(),
        "Loaded payload corpus"
    );
    (literals, files_loaded, true)
}
