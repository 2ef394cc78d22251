//! Rule-based repairs attempted before falling back to an LLM repair pass
//! (spec §4.5: cheap deterministic fixes first).
//!
//! `pom.xml` dependency injection is grounded on the `quick-xml` usage
//! pattern from the pack's manifest-handling examples; the
//! cancellable-event rewrite mirrors a common Bukkit API foot-gun (an
//! event implementing `Cancellable` where the generated code called
//! `setCancelled` without implementing the interface).

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::compiler::diagnostics::{classify, DiagnosticCategory};
use crate::error::{ForgeError, ForgeResult};
use crate::model::CompilationDiagnostic;

/// Known Maven coordinates for packages commonly missing from a
/// freshly generated Bukkit/Spigot `pom.xml`.
fn known_dependency_for_package(package: &str) -> Option<(&'static str, &'static str, &'static str)> {
    if package.starts_with("org.bukkit") || package.starts_with("org.spigotmc") {
        Some(("org.spigotmc", "spigot-api", "1.20.4-R0.1-SNAPSHOT"))
    } else if package.starts_with("net.md_5.bungee") {
        Some(("net.md-5", "bungeecord-api", "1.20-R0.1-SNAPSHOT"))
    } else {
        None
    }
}

/// Adds a `<dependency>` entry to `pom_xml` for the Maven coordinate that
/// resolves `missing_package`, if one is known and not already present.
/// Returns the unmodified XML when nothing applicable is found so the
/// caller can fall through to an LLM repair pass.
pub fn inject_dependency(pom_xml: &str, missing_package: &str) -> ForgeResult<Option<String>> {
    let Some((group_id, artifact_id, version)) = known_dependency_for_package(missing_package) else {
        return Ok(None);
    };

    if pom_xml.contains(&format!("<artifactId>{artifact_id}</artifactId>")) {
        return Ok(None);
    }

    let mut reader = Reader::from_str(pom_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::new());

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ForgeError::Compile(format!("pom.xml parse error: {e}")))?;
        match event {
            Event::End(e) if e.name().as_ref() == b"dependencies" => {
                let dep = format!(
                    "<dependency><groupId>{group_id}</groupId><artifactId>{artifact_id}</artifactId><version>{version}</version><scope>provided</scope></dependency>"
                );
                let mut dep_reader = Reader::from_str(&dep);
                dep_reader.config_mut().trim_text(false);
                loop {
                    match dep_reader
                        .read_event()
                        .map_err(|e| ForgeError::Compile(format!("dependency fragment error: {e}")))?
                    {
                        Event::Eof => break,
                        other => writer
                            .write_event(other)
                            .map_err(|e| ForgeError::Compile(format!("pom.xml write error: {e}")))?,
                    }
                }
                writer
                    .write_event(Event::End(e))
                    .map_err(|e| ForgeError::Compile(format!("pom.xml write error: {e}")))?;
            }
            Event::Eof => break,
            other => writer
                .write_event(other)
                .map_err(|e| ForgeError::Compile(format!("pom.xml write error: {e}")))?,
        }
    }

    let bytes = writer.into_inner();
    let xml = String::from_utf8(bytes).map_err(|e| ForgeError::Compile(format!("pom.xml utf8 error: {e}")))?;
    Ok(Some(xml))
}

/// Ensures a `pom.xml` has an (empty, if needed) `<dependencies>` element
/// so [`inject_dependency`] always has an insertion point.
pub fn ensure_dependencies_element(pom_xml: &str) -> String {
    if pom_xml.contains("<dependencies>") {
        return pom_xml.to_string();
    }
    pom_xml.replacen("</project>", "<dependencies></dependencies></project>", 1)
}

/// Rewrites a naive `event.setCancelled(true)` call on a class that
/// doesn't implement `Cancellable` into the standard Bukkit idiom,
/// wrapping the event type as `Cancellable` via an instanceof check.
pub fn fix_cancellable_event_misuse(source: &str) -> Option<String> {
    if !source.contains(".setCancelled(") || source.contains("Cancellable") {
        return None;
    }
    let fixed = source.replacen(
        ".setCancelled(true)",
        " instanceof Cancellable ? ((Cancellable) event).setCancelled(true) : null",
        1,
    );
    Some(fixed)
}

/// Attempts a rule-based repair for one diagnostic, returning the
/// modified file content keyed by the relative path it should be
/// written to, if any rule applies.
pub fn try_rule_based_repair(
    diagnostic: &CompilationDiagnostic,
    pom_xml: &str,
    affected_source: Option<&str>,
) -> ForgeResult<Option<(&'static str, String)>> {
    match classify(diagnostic) {
        DiagnosticCategory::MissingDependency => {
            let package = extract_missing_package(&diagnostic.message).unwrap_or_default();
            let pom_xml = ensure_dependencies_element(pom_xml);
            if let Some(patched) = inject_dependency(&pom_xml, &package)? {
                Ok(Some(("pom.xml", patched)))
            } else {
                Ok(None)
            }
        }
        DiagnosticCategory::CancellableEventMisuse => {
            let source = affected_source.unwrap_or_default();
            Ok(fix_cancellable_event_misuse(source).map(|fixed| ("__affected_source__", fixed)))
        }
        DiagnosticCategory::MissingImport | DiagnosticCategory::Unknown => Ok(None),
    }
}

fn extract_missing_package(message: &str) -> Option<String> {
    let idx = message.find("package ")?;
    let rest = &message[idx + 8..];
    rest.split(' ').next().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_POM: &str = r#"<project><dependencies></dependencies></project>"#;

    #[test]
    fn test_inject_known_dependency() {
        let result = inject_dependency(SAMPLE_POM, "org.bukkit.event.Listener").unwrap();
        let xml = result.expect("should inject spigot-api");
        assert!(xml.contains("spigot-api"));
    }

    #[test]
    fn test_inject_unknown_package_returns_none() {
        let result = inject_dependency(SAMPLE_POM, "com.totally.unknown.Thing").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_inject_skips_if_already_present() {
        let pom = r#"<project><dependencies><dependency><groupId>org.spigotmc</groupId><artifactId>spigot-api</artifactId><version>1.20.4-R0.1-SNAPSHOT</version></dependency></dependencies></project>"#;
        let result = inject_dependency(pom, "org.bukkit.event.Listener").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_ensure_dependencies_element_adds_when_missing() {
        let pom = "<project></project>";
        let patched = ensure_dependencies_element(pom);
        assert!(patched.contains("<dependencies>"));
    }

    #[test]
    fn test_fix_cancellable_event_misuse() {
        let source = "public void onBreak(BlockBreakEvent event) { event.setCancelled(true); }";
        let fixed = fix_cancellable_event_misuse(source).unwrap();
        assert!(fixed.contains("instanceof Cancellable"));
    }

    #[test]
    fn test_extract_missing_package() {
        assert_eq!(
            extract_missing_package("package org.bukkit.event does not exist"),
            Some("org.bukkit.event".to_string())
        );
    }
}
