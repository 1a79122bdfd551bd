use std::path::PathBuf;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error};
use crate::config::types::ScannerConfig;
use crate::errors::ScanlineError;
use crate::models::finding::RawFinding;
use crate::models::image::ImageRef;
use super::ScanEngine;

/// Runs `trivy image --format json` against the digest reference of an image
/// and flattens every result target into raw findings.
#[derive(Debug, Clone)]
pub struct TrivyScanner {
    binary_path: PathBuf,
    cache_dir: PathBuf,
    skip_db_update: bool,
}

impl TrivyScanner {
    pub fn new(binary_path: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            cache_dir: cache_dir.into(),
            skip_db_update: false,
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            binary_path: PathBuf::from(&config.binary),
            cache_dir: PathBuf::from(&config.cache_dir),
            skip_db_update: config.skip_db_update,
        }
    }

    fn command(&self, image: &ImageRef) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("image")
            .arg("--format")
            .arg("json")
            .arg("--cache-dir")
            .arg(&self.cache_dir)
            .arg("--quiet");

        if self.skip_db_update {
            cmd.arg("--skip-db-update");
        }

        cmd.arg(image.reference());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ScanEngine for TrivyScanner {
    fn name(&self) -> &str {
        "trivy"
    }

    async fn scan(&self, image: &ImageRef) -> Result<Vec<RawFinding>, ScanlineError> {
        debug!(image = %image.reference(), "Invoking trivy");
        let output = self.command(image)
            .output()
            .await
            .map_err(|e| ScanlineError::Scanner(format!("Failed to run trivy: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&image.reference(), &stderr));
        }

        parse_output(&output.stdout)
    }
}

/// Map trivy's stderr onto the engine failure taxonomy.
fn classify_failure(reference: &str, stderr: &str) -> ScanlineError {
    let lowered = stderr.to_ascii_lowercase();
    let detail = stderr.lines().last().unwrap_or("").trim().to_string();

    if lowered.contains("manifest_unknown") || lowered.contains("manifest unknown") || lowered.contains("name_unknown") {
        ScanlineError::UnknownImage(format!("{}: {}", reference, detail))
    } else if lowered.contains("toomanyrequests") || lowered.contains("429") {
        ScanlineError::Throttled(detail)
    } else if lowered.contains("unable to initialize") || lowered.contains("pull") || lowered.contains("connection") {
        ScanlineError::RegistryPull(detail)
    } else {
        ScanlineError::Scanner(detail)
    }
}

/// Parse trivy JSON output. Empty output means no vulnerabilities.
pub fn parse_output(output: &[u8]) -> Result<Vec<RawFinding>, ScanlineError> {
    if output.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let trivy_output: TrivyOutput = serde_json::from_slice(output).map_err(|e| {
        error!("Trivy output: {}", String::from_utf8_lossy(output));
        ScanlineError::Scanner(format!("Failed to parse trivy output: {}", e))
    })?;

    let mut findings = Vec::new();
    for result in trivy_output.results.unwrap_or_default() {
        for vuln in result.vulnerabilities.unwrap_or_default() {
            findings.push(RawFinding {
                vuln_id: vuln.vulnerability_id,
                package: vuln.pkg_name,
                pkg_source: result.target.clone(),
                installed_version: vuln.installed_version,
                fixed_version: vuln.fixed_version.filter(|v| !v.is_empty()),
                severity: vuln.severity,
                title: vuln.title,
                reference: vuln.primary_url.or_else(|| vuln.references.and_then(|r| r.into_iter().next())),
            });
        }
    }
    Ok(findings)
}

// Trivy JSON output structures

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyOutput {
    results: Option<Vec<TrivyResult>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyResult {
    target: Option<String>,
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    vulnerability_id: String,
    pkg_name: String,
    installed_version: Option<String>,
    fixed_version: Option<String>,
    severity: String,
    title: Option<String>,
    #[serde(rename = "PrimaryURL")]
    primary_url: Option<String>,
    references: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_output(b"").unwrap().is_empty());
        assert!(parse_output(b"\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_trivy_output() {
        let output = r#"{
            "ArtifactName": "registry.example.com/app@sha256:d1",
            "ArtifactType": "container_image",
            "Results": [
                {
                    "Target": "registry.example.com/app (alpine 3.18.4)",
                    "Class": "os-pkgs",
                    "Type": "alpine",
                    "Vulnerabilities": [
                        {
                            "VulnerabilityID": "CVE-2023-5678",
                            "PkgName": "libcrypto3",
                            "InstalledVersion": "3.1.3-r0",
                            "FixedVersion": "3.1.4-r1",
                            "Severity": "MEDIUM",
                            "Title": "openssl: Generating excessively long X9.42 DH keys",
                            "PrimaryURL": "https://avd.aquasec.com/nvd/cve-2023-5678"
                        },
                        {
                            "VulnerabilityID": "CVE-2023-0001",
                            "PkgName": "busybox",
                            "InstalledVersion": "1.36.1-r2",
                            "FixedVersion": "",
                            "Severity": "LOW",
                            "References": ["https://example.com/advisory"]
                        }
                    ]
                },
                {
                    "Target": "app/go.sum",
                    "Class": "lang-pkgs",
                    "Type": "gomod"
                }
            ]
        }"#;

        let findings = parse_output(output.as_bytes()).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].vuln_id, "CVE-2023-5678");
        assert_eq!(findings[0].package, "libcrypto3");
        assert_eq!(findings[0].fixed_version.as_deref(), Some("3.1.4-r1"));
        assert_eq!(findings[0].reference.as_deref(), Some("https://avd.aquasec.com/nvd/cve-2023-5678"));
        assert_eq!(findings[0].pkg_source.as_deref(), Some("registry.example.com/app (alpine 3.18.4)"));
        assert_eq!(findings[1].fixed_version, None);
        assert_eq!(findings[1].reference.as_deref(), Some("https://example.com/advisory"));
    }

    #[test]
    fn test_parse_output_without_results() {
        let findings = parse_output(br#"{"ArtifactName": "scratch"}"#).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_scanner_error() {
        let err = parse_output(b"not json").unwrap_err();
        assert!(matches!(err, ScanlineError::Scanner(_)));
    }

    #[test]
    fn test_classify_failure() {
        let reference = "registry.example.com/app@sha256:00";
        assert!(matches!(
            classify_failure(reference, "FATAL MANIFEST_UNKNOWN: manifest unknown"),
            ScanlineError::UnknownImage(_)
        ));
        assert!(matches!(
            classify_failure(reference, "TOOMANYREQUESTS: rate limit"),
            ScanlineError::Throttled(_)
        ));
        assert!(matches!(
            classify_failure(reference, "unable to initialize a scanner: connection refused"),
            ScanlineError::RegistryPull(_)
        ));
        assert!(matches!(
            classify_failure(reference, "panic: db corrupt"),
            ScanlineError::Scanner(_)
        ));
    }

    #[test]
    fn test_command_targets_digest_reference() {
        let scanner = TrivyScanner::new("/usr/bin/trivy", "/tmp/trivy");
        let image = ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "app".to_string(),
            tag: Some("v1".to_string()),
            digest: "sha256:d1".to_string(),
        };
        let cmd = scanner.command(&image);
        let args: Vec<String> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.last().map(String::as_str), Some("registry.example.com/app@sha256:d1"));
        assert!(args.contains(&"--cache-dir".to_string()));
    }
}
