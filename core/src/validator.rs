//! C4 Cross-File Validator.
//!
//! Spec §4.4: seven structural/semantic checks, each subtracting points
//! from a starting score of 100. Penalty sizing and the additive-scoring
//! shape follow the teacher's `verifier/pipeline.rs` gate-scoring style
//! (independent checks, each contributing its own deduction, summed into
//! one pass/fail score).

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::model::ValidationResult;

const START_SCORE: i32 = 100;

/// One sub-check's contribution: an issue (if it fired), an optional
/// penalty, and any suggestions/contextual errors it raised along the way.
struct Finding {
    issue: Option<(&'static str, i32)>,
    suggestions: Vec<String>,
    contextual_errors: Vec<String>,
}

impl Finding {
    fn clean() -> Self {
        Self {
            issue: None,
            suggestions: Vec::new(),
            contextual_errors: Vec::new(),
        }
    }

    fn issue(name: &'static str, penalty: i32) -> Self {
        Self {
            issue: Some((name, penalty)),
            suggestions: Vec::new(),
            contextual_errors: Vec::new(),
        }
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    fn with_contextual_error(mut self, error: impl Into<String>) -> Self {
        self.contextual_errors.push(error.into());
        self
    }
}

/// Runs the fixed battery of cross-file checks (spec §4.4, sub-checks
/// 1-7) against the full set of generated files (relative path -> source
/// text) plus the plugin descriptor's declared main class.
pub fn validate(files: &BTreeMap<String, String>, main_class: &str) -> ValidationResult {
    let mut score = START_SCORE;
    let mut issues = Vec::new();
    let mut suggestions = Vec::new();
    let mut contextual_errors = Vec::new();

    for finding in [
        check_package_consistency(files),
        check_class_references(files),
        check_import_analysis(files),
        check_config_consistency(files),
        check_plugin_descriptor_consistency(files, main_class),
        check_dependency_fulfilment(files),
        check_style_consistency(files),
    ] {
        if let Some((name, penalty)) = finding.issue {
            score -= penalty;
            issues.push(format!("{name}: -{penalty}"));
        }
        suggestions.extend(finding.suggestions);
        contextual_errors.extend(finding.contextual_errors);
    }

    ValidationResult::new(score.clamp(0, 100) as u8, issues, suggestions, contextual_errors)
}

/// 1. Package consistency: every Java file's declared package should
/// agree with the package implied by its path, tolerating sub-packages
/// and packages that embed the plugin name.
fn check_package_consistency(files: &BTreeMap<String, String>) -> Finding {
    let re = Regex::new(r"^\s*package\s+([\w.]+)\s*;").unwrap();
    let mut mismatches = 0;
    for (path, content) in files.iter().filter(|(p, _)| p.ends_with(".java")) {
        if let Some(declared) = content.lines().find_map(|l| re.captures(l)).map(|c| c[1].to_string()) {
            let expected = java_package_from_path(path);
            if !expected.is_empty() && declared != expected && !declared.starts_with(&expected) && !expected.starts_with(&declared) {
                mismatches += 1;
            }
        }
    }
    if mismatches == 0 {
        Finding::clean()
    } else {
        Finding::issue("package_mismatch", (5 * mismatches).min(25))
    }
}

pub(crate) fn java_package_from_path(path: &str) -> String {
    let Some(java_idx) = path.find("java/") else {
        return String::new();
    };
    let rest = &path[java_idx + 5..];
    let Some(slash) = rest.rfind('/') else {
        return String::new();
    };
    rest[..slash].replace('/', ".")
}

const WELL_KNOWN_TYPES: &[&str] = &[
    "String", "Integer", "Long", "Double", "Float", "Boolean", "Object", "Void", "Class",
    "List", "ArrayList", "Map", "HashMap", "Set", "HashSet", "Optional", "Override",
    "SuppressWarnings", "Exception", "RuntimeException", "IllegalStateException", "IOException",
    "Player", "Bukkit", "Plugin", "JavaPlugin", "Event", "Events", "Listener", "EventHandler",
    "Cancellable", "Material", "ItemStack", "Location", "World", "Server", "CommandSender",
    "Command", "ChatColor", "PluginManager", "EventPriority",
];

/// 2. Class references: flags identifiers used as `new X(` / `X.method(`
/// that are neither locally declared nor well-known JDK/Bukkit types,
/// suggesting the closest locally known name when its bigram Jaccard
/// similarity is >= 0.7.
fn check_class_references(files: &BTreeMap<String, String>) -> Finding {
    let local_classes = local_class_names(files);
    let new_re = Regex::new(r"\bnew\s+([A-Z]\w*)\s*\(").unwrap();
    let call_re = Regex::new(r"\b([A-Z]\w*)\.[A-Za-z_]\w*\s*\(").unwrap();

    let mut unknown = 0;
    let mut suggestions = Vec::new();
    for (path, content) in files.iter().filter(|(p, _)| p.ends_with(".java")) {
        let identifiers = new_re.captures_iter(content).chain(call_re.captures_iter(content)).map(|c| c[1].to_string());
        for ident in identifiers {
            if local_classes.contains(&ident) || WELL_KNOWN_TYPES.contains(&ident.as_str()) {
                continue;
            }
            unknown += 1;
            if let Some(closest) = closest_by_jaccard(&ident, &local_classes) {
                suggestions.push(format!("{path}: did you mean `{closest}` instead of `{ident}`?"));
            }
        }
    }

    if unknown == 0 {
        Finding::clean()
    } else {
        let mut finding = Finding::issue("unknown_class_references", (4 * unknown).min(20));
        finding.suggestions = suggestions;
        finding
    }
}

fn local_class_names(files: &BTreeMap<String, String>) -> HashSet<String> {
    let class_re = Regex::new(r"(?:class|interface|enum)\s+(\w+)").unwrap();
    files
        .iter()
        .filter(|(p, _)| p.ends_with(".java"))
        .filter_map(|(_, content)| class_re.captures(content).map(|c| c[1].to_string()))
        .collect()
}

fn closest_by_jaccard(ident: &str, candidates: &HashSet<String>) -> Option<String> {
    candidates
        .iter()
        .map(|c| (c, jaccard_bigram(ident, c)))
        .filter(|(_, score)| *score >= 0.7)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, _)| c.clone())
}

fn jaccard_bigram(a: &str, b: &str) -> f64 {
    let bigrams = |s: &str| -> HashSet<(char, char)> {
        let chars: Vec<char> = s.to_lowercase().chars().collect();
        chars.windows(2).map(|w| (w[0], w[1])).collect()
    };
    let (ba, bb) = (bigrams(a), bigrams(b));
    if ba.is_empty() || bb.is_empty() {
        return if a.eq_ignore_ascii_case(b) { 1.0 } else { 0.0 };
    }
    let intersection = ba.intersection(&bb).count() as f64;
    let union = ba.union(&bb).count() as f64;
    intersection / union
}

/// 3. Import analysis: imports of project-prefixed classes that don't
/// exist anywhere in the generated set are issues; imports never
/// referenced in the file body are suggestions.
fn check_import_analysis(files: &BTreeMap<String, String>) -> Finding {
    let import_re = Regex::new(r"^\s*import\s+([\w.]+)\s*;").unwrap();
    let local_packages: Vec<String> = files
        .keys()
        .filter(|p| p.ends_with(".java"))
        .map(|p| java_package_from_path(p))
        .filter(|p| !p.is_empty())
        .collect();

    let mut unresolved = 0;
    let mut suggestions = Vec::new();
    for (path, content) in files.iter().filter(|(p, _)| p.ends_with(".java")) {
        for line in content.lines() {
            let Some(caps) = import_re.captures(line) else { continue };
            let imported = &caps[1];
            let is_external = !imported.starts_with("java.") && !imported.starts_with("org.bukkit") && !imported.starts_with("org.spigotmc");
            if is_external && !local_packages.iter().any(|p| imported.starts_with(p.as_str())) {
                unresolved += 1;
                continue;
            }
            let simple_name = imported.rsplit('.').next().unwrap_or(imported);
            let used_in_body = content.lines().filter(|l| !l.trim_start().starts_with("import")).any(|l| l.contains(simple_name));
            if !used_in_body {
                suggestions.push(format!("{path}: import `{imported}` is never referenced"));
            }
        }
    }

    if unresolved == 0 {
        let mut finding = Finding::clean();
        finding.suggestions = suggestions;
        finding
    } else {
        let mut finding = Finding::issue("unresolved_imports", (3 * unresolved).min(15));
        finding.suggestions = suggestions;
        finding
    }
}

/// 4. Config consistency: compares the key sets of generically-named
/// config files (e.g. `config.yml`, `config-dev.yml`) and flags near
/// matches (likely typos) between them. `plugin.yml` has its own fixed
/// grammar and is excluded, handled by check 5 instead.
fn check_config_consistency(files: &BTreeMap<String, String>) -> Finding {
    let config_files: Vec<(&String, HashSet<String>)> = files
        .iter()
        .filter(|(p, _)| (p.ends_with(".yml") || p.ends_with(".yaml")) && !p.ends_with("plugin.yml"))
        .filter_map(|(path, content)| yaml_top_level_keys(content).map(|keys| (path, keys)))
        .collect();

    if config_files.len() < 2 {
        return Finding::clean();
    }

    let mut near_misses = 0;
    let mut suggestions = Vec::new();
    for i in 0..config_files.len() {
        for j in (i + 1)..config_files.len() {
            let (path_a, keys_a) = &config_files[i];
            let (path_b, keys_b) = &config_files[j];
            for key_a in keys_a {
                if keys_b.contains(key_a) {
                    continue;
                }
                if let Some(close) = keys_b.iter().find(|key_b| jaccard_bigram(key_a, key_b) >= 0.6 && *key_b != key_a) {
                    near_misses += 1;
                    suggestions.push(format!(
                        "{path_a} has key `{key_a}`, {path_b} has near-match `{close}` — possible typo"
                    ));
                }
            }
        }
    }

    if near_misses == 0 {
        Finding::clean()
    } else {
        let mut finding = Finding::issue("config_key_near_miss", (3 * near_misses).min(12));
        finding.suggestions = suggestions;
        finding
    }
}

fn yaml_top_level_keys(content: &str) -> Option<HashSet<String>> {
    let value: serde_yaml::Value = serde_yaml::from_str(content).ok()?;
    let mapping = value.as_mapping()?;
    Some(mapping.keys().filter_map(|k| k.as_str().map(String::from)).collect())
}

/// 5. Plugin descriptor consistency: the descriptor must exist, its
/// `main` class must exist and extend the plugin base class, and any
/// declared commands must be handled somewhere in the generated sources.
fn check_plugin_descriptor_consistency(files: &BTreeMap<String, String>, main_class: &str) -> Finding {
    let expected_suffix = format!("{}.java", main_class.rsplit('.').next().unwrap_or(main_class));
    let main_file = files.iter().find(|(path, _)| path.ends_with(&expected_suffix));

    let Some((_, main_content)) = main_file else {
        return Finding::issue("main_class_missing", 40);
    };

    let mut penalty = 0;
    let mut contextual_errors = Vec::new();
    if !main_content.contains("extends JavaPlugin") {
        penalty += 20;
        contextual_errors.push(format!("{main_class}: does not extend JavaPlugin"));
    }

    if let Some(commands) = files.iter().find(|(p, _)| p.ends_with("plugin.yml")).and_then(|(_, c)| declared_commands(c)) {
        let has_command_handler = files.values().any(|c| c.contains("onCommand"));
        if !commands.is_empty() && !has_command_handler {
            penalty += 15;
            contextual_errors.push("plugin.yml declares commands but no onCommand handler was found".into());
        }
    }

    if penalty == 0 {
        Finding::clean()
    } else {
        let mut finding = Finding::issue("descriptor_inconsistent", penalty.min(35));
        finding.contextual_errors = contextual_errors;
        finding
    }
}

fn declared_commands(plugin_yml: &str) -> Option<Vec<String>> {
    let value: serde_yaml::Value = serde_yaml::from_str(plugin_yml).ok()?;
    let commands = value.get("commands")?.as_mapping()?;
    Some(commands.keys().filter_map(|k| k.as_str().map(String::from)).collect())
}

/// 6. Dependency fulfilment: when the generated sources implement an
/// event listener, the integration marker (registration with the plugin
/// manager) must actually be present somewhere.
fn check_dependency_fulfilment(files: &BTreeMap<String, String>) -> Finding {
    let has_listener_impl = files.values().any(|c| c.contains("implements Listener") || c.contains("extends Listener"));
    let has_registration = files.values().any(|c| c.contains("registerEvents") || c.contains("getPluginManager()"));
    if !has_listener_impl || has_registration {
        Finding::clean()
    } else {
        Finding::issue("listener_not_registered", 10)
    }
}

/// 7. Style consistency: the first Java file (lexically) sets the
/// indentation and brace-placement convention; other files are checked
/// against it.
fn check_style_consistency(files: &BTreeMap<String, String>) -> Finding {
    let mut java_files = files.iter().filter(|(p, _)| p.ends_with(".java"));
    let Some((_, reference)) = java_files.next() else {
        return Finding::clean();
    };
    let reference_style = file_style(reference);

    let mut deviations = 0;
    for (path, content) in java_files {
        let style = file_style(content);
        if style.uses_tabs != reference_style.uses_tabs || style.brace_on_same_line != reference_style.brace_on_same_line {
            deviations += 1;
            tracing::debug!(path, "style deviates from reference file");
        }
    }

    if deviations == 0 {
        Finding::clean()
    } else {
        Finding::issue("style_inconsistent", (5 * deviations).min(15))
    }
}

struct FileStyle {
    uses_tabs: bool,
    brace_on_same_line: bool,
}

fn file_style(content: &str) -> FileStyle {
    let indented_lines: Vec<&str> = content.lines().filter(|l| l.starts_with(' ') || l.starts_with('\t')).collect();
    let tab_lines = indented_lines.iter().filter(|l| l.starts_with('\t')).count();
    let uses_tabs = tab_lines * 2 > indented_lines.len();

    let same_line = content.lines().filter(|l| l.trim_end().ends_with('{')).count();
    let next_line = content.lines().filter(|l| l.trim() == "{").count();
    FileStyle {
        uses_tabs,
        brace_on_same_line: same_line >= next_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_clean_plugin_scores_perfectly() {
        let files = files(&[
            (
                "src/main/java/com/generated/welcomer/Main.java",
                "package com.generated.welcomer;\n\npublic class Main extends JavaPlugin {}\n",
            ),
            ("src/main/resources/plugin.yml", "name: Welcomer\nmain: com.generated.welcomer.Main\n"),
        ]);
        let result = validate(&files, "com.generated.welcomer.Main");
        assert_eq!(result.score, 100);
        assert!(result.issues.is_empty());
        assert!(result.is_valid);
    }

    #[test]
    fn test_missing_main_class_heavily_penalized() {
        let files = files(&[("src/main/resources/plugin.yml", "name: Foo\n")]);
        let result = validate(&files, "com.generated.foo.Main");
        assert!(result.score <= 60);
        assert!(result.issues.iter().any(|i| i.contains("main_class_missing")));
        assert!(!result.is_valid);
    }

    #[test]
    fn test_main_class_not_extending_base_is_flagged() {
        let files = files(&[
            (
                "src/main/java/com/generated/foo/Main.java",
                "package com.generated.foo;\npublic class Main {}\n",
            ),
            ("src/main/resources/plugin.yml", "name: Foo\nmain: com.generated.foo.Main\n"),
        ]);
        let result = validate(&files, "com.generated.foo.Main");
        assert!(result.contextual_errors.iter().any(|e| e.contains("does not extend")));
    }

    #[test]
    fn test_unknown_class_reference_suggests_closest_match() {
        let files = files(&[(
            "src/main/java/com/generated/foo/Main.java",
            "package com.generated.foo;\npublic class Mainn extends JavaPlugin {\n    void go() { Mainn x = new Maiin(); }\n}\n",
        )]);
        let result = validate(&files, "com.generated.foo.Mainn");
        assert!(result.suggestions.iter().any(|s| s.contains("Maiin")));
    }

    #[test]
    fn test_plugin_yml_commands_without_handler_flagged() {
        let files = files(&[
            (
                "src/main/java/com/generated/foo/Main.java",
                "package com.generated.foo;\npublic class Main extends JavaPlugin {}\n",
            ),
            (
                "src/main/resources/plugin.yml",
                "name: Foo\nmain: com.generated.foo.Main\ncommands:\n  hello:\n    description: says hi\n",
            ),
        ]);
        let result = validate(&files, "com.generated.foo.Main");
        assert!(result.contextual_errors.iter().any(|e| e.contains("onCommand")));
    }

    #[test]
    fn test_passing_threshold() {
        let files = files(&[
            (
                "src/main/java/com/generated/welcomer/Main.java",
                "package com.generated.welcomer;\npublic class Main extends JavaPlugin {}\n",
            ),
            ("src/main/resources/plugin.yml", "name: Welcomer\nmain: com.generated.welcomer.Main\n"),
        ]);
        let result = validate(&files, "com.generated.welcomer.Main");
        assert!(result.passing(95));
    }

    #[test]
    fn test_jaccard_bigram_identical_strings() {
        assert_eq!(jaccard_bigram("Welcomer", "Welcomer"), 1.0);
    }
}
