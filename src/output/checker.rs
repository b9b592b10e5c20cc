use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, warn};

use super::{CapturedOutput, Stream};
use crate::config::{ConfigError, FalsePositiveConfig};

/// Words that should never appear in the output of a healthy service
static SUSPICIOUS_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)\b(?:exception|error|warning|fatal|traceback|fault|crash(?:ed)?|abort(?:ed)?|uninitiali[zs]ed)\b",
    )
    .unwrap()
});

/// Valgrind's leak report header
static LEAK_SUMMARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^==[0-9]+== LEAK SUMMARY:").unwrap());

/// Suspicious text found in captured output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Suspicious output to {stream} (matched {matched:?})")]
pub struct SuspiciousOutput {
    pub stream: Stream,
    pub matched: String,
}

/// Regex flags for a false-positive rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleFlags {
    pub case_insensitive: bool,
    /// `^`/`$` match at line boundaries
    pub multi_line: bool,
    pub dot_matches_new_line: bool,
}

impl Default for RuleFlags {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            multi_line: true,
            dot_matches_new_line: false,
        }
    }
}

/// A known-benign message that must not fail the scenario
#[derive(Debug, Clone)]
pub struct FalsePositiveRule {
    regex: Regex,
    max_count: usize,
}

impl FalsePositiveRule {
    /// `max_count` of 0 suppresses every match
    pub fn new(pattern: &str, flags: RuleFlags, max_count: usize) -> Result<Self, ConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(flags.case_insensitive)
            .multi_line(flags.multi_line)
            .dot_matches_new_line(flags.dot_matches_new_line)
            .build()
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { regex, max_count })
    }

    /// Rule matching `text` exactly
    pub fn literal(text: &str, max_count: usize) -> Result<Self, ConfigError> {
        Self::new(&regex::escape(text), RuleFlags::default(), max_count)
    }

    pub fn from_config(config: &FalsePositiveConfig) -> Result<Self, ConfigError> {
        let pattern: Cow<'_, str> = if config.literal {
            Cow::Owned(regex::escape(&config.pattern))
        } else {
            Cow::Borrowed(&config.pattern)
        };
        let flags = RuleFlags {
            case_insensitive: config.case_insensitive,
            ..RuleFlags::default()
        };
        Self::new(&pattern, flags, config.count)
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Remove matches from stdout first, then spend any remaining allowance on stderr
    fn strip<'a>(&self, stdout: &'a str, stderr: &'a str) -> (Cow<'a, str>, Cow<'a, str>) {
        if self.max_count == 0 {
            return (
                self.regex.replace_all(stdout, ""),
                self.regex.replace_all(stderr, ""),
            );
        }

        let in_stdout = self.regex.find_iter(stdout).take(self.max_count).count();
        let stdout = self.regex.replacen(stdout, self.max_count, "");
        let remaining = self.max_count - in_stdout;
        let stderr = if remaining > 0 {
            self.regex.replacen(stderr, remaining, "")
        } else {
            Cow::Borrowed(stderr)
        };
        (stdout, stderr)
    }
}

/// Per-scenario rule registry and classifier
#[derive(Debug, Clone, Default)]
pub struct OutputSurveillance {
    rules: Vec<FalsePositiveRule>,
}

impl OutputSurveillance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<FalsePositiveRule>) -> Self {
        Self { rules }
    }

    pub fn register(&mut self, rule: FalsePositiveRule) {
        debug!(
            "Registered false positive {:?} (count {})",
            rule.pattern(),
            rule.max_count()
        );
        self.rules.push(rule);
    }

    pub fn register_false_positive(
        &mut self,
        pattern: &str,
        flags: RuleFlags,
        max_count: usize,
    ) -> Result<(), ConfigError> {
        self.register(FalsePositiveRule::new(pattern, flags, max_count)?);
        Ok(())
    }

    pub fn register_literal(&mut self, text: &str, max_count: usize) -> Result<(), ConfigError> {
        self.register(FalsePositiveRule::literal(text, max_count)?);
        Ok(())
    }

    pub fn rules(&self) -> &[FalsePositiveRule] {
        &self.rules
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    /// Output left after every rule has been applied, in registration order
    pub fn residual(&self, output: &CapturedOutput) -> CapturedOutput {
        let mut stdout = output.text(Stream::Stdout).into_owned();
        let mut stderr = output.text(Stream::Stderr).into_owned();
        for rule in &self.rules {
            let (out, err) = rule.strip(&stdout, &stderr);
            let (out, err) = (out.into_owned(), err.into_owned());
            stdout = out;
            stderr = err;
        }
        CapturedOutput::new(stdout, stderr)
    }

    /// Fail on the first suspicious match in the residual output
    pub fn classify(&self, output: &CapturedOutput) -> Result<(), SuspiciousOutput> {
        let residual = self.residual(output);
        for pattern in [&*SUSPICIOUS_WORDS, &*LEAK_SUMMARY] {
            for stream in [Stream::Stderr, Stream::Stdout] {
                if let Some(hit) = pattern.find(&residual.text(stream)) {
                    return Err(SuspiciousOutput {
                        stream,
                        matched: hit.as_str().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Re-emit `output` to the real streams, then classify it
    pub fn check(&self, output: &CapturedOutput) -> Result<(), SuspiciousOutput> {
        output.emit();
        let verdict = self.classify(output);
        if let Err(e) = &verdict {
            warn!("{}", e);
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_KEY_WARNING: &str =
        "Warning: Permanently added \"localhost\" (ED25519) to the list of known hosts.";

    #[test]
    fn test_clean_output_passes() {
        let surveillance = OutputSurveillance::new();
        let output = CapturedOutput::new("mounted\n", "sshfs version 3.7\n");
        assert!(surveillance.classify(&output).is_ok());
    }

    #[test]
    fn test_keywords_are_case_insensitive_whole_words() {
        let surveillance = OutputSurveillance::new();
        for text in [
            "An ERROR occurred",
            "Traceback (most recent call last):",
            "process crashed",
            "aborted",
            "read of uninitialised value",
            "Uninitialized memory",
            "Segmentation fault",
            "warning: something",
        ] {
            let output = CapturedOutput::new("", format!("{}\n", text));
            assert!(
                surveillance.classify(&output).is_err(),
                "{:?} should be flagged",
                text
            );
        }

        // Substrings of longer words are not whole-word hits
        let output = CapturedOutput::new("errors=0 faulty crashes\n", "");
        assert!(surveillance.classify(&output).is_ok());
    }

    #[test]
    fn test_leak_summary_marker_at_line_start() {
        let surveillance = OutputSurveillance::new();

        let output = CapturedOutput::new("", "==1234== LEAK SUMMARY:\n");
        let err = surveillance.classify(&output).unwrap_err();
        assert_eq!(err.matched, "==1234== LEAK SUMMARY:");

        let output = CapturedOutput::new("", "note: ==1234== LEAK SUMMARY:\n");
        assert!(surveillance.classify(&output).is_ok());
    }

    #[test]
    fn test_reports_stream_and_text() {
        let surveillance = OutputSurveillance::new();
        let output = CapturedOutput::new("fatal: bad stuff\n", "");
        let err = surveillance.classify(&output).unwrap_err();
        assert_eq!(err.stream, Stream::Stdout);
        assert_eq!(err.matched, "fatal");

        let output = CapturedOutput::new("", "Exception in handler\n");
        let err = surveillance.classify(&output).unwrap_err();
        assert_eq!(err.stream, Stream::Stderr);
        assert_eq!(err.matched, "Exception");
    }

    #[test]
    fn test_unlimited_rule_suppresses_host_key_warning() {
        let mut surveillance = OutputSurveillance::new();
        surveillance.register_literal(HOST_KEY_WARNING, 0).unwrap();

        let stderr = format!("{}\n{}\n", HOST_KEY_WARNING, HOST_KEY_WARNING);
        let output = CapturedOutput::new("", stderr);
        assert!(surveillance.classify(&output).is_ok());
    }

    #[test]
    fn test_rule_does_not_hide_unrelated_fault() {
        let mut surveillance = OutputSurveillance::new();
        surveillance.register_literal(HOST_KEY_WARNING, 0).unwrap();

        let stderr = format!("{}\nSegmentation fault\n", HOST_KEY_WARNING);
        let output = CapturedOutput::new("", stderr);
        let err = surveillance.classify(&output).unwrap_err();
        assert_eq!(err.matched, "fault");
        assert_eq!(err.stream, Stream::Stderr);
    }

    #[test]
    fn test_count_is_spent_on_stdout_first() {
        let mut surveillance = OutputSurveillance::new();
        surveillance
            .register_false_positive("benign error", RuleFlags::default(), 2)
            .unwrap();

        // Two in stdout use up the allowance; the stderr one survives
        let output = CapturedOutput::new("benign error\nbenign error\n", "benign error\n");
        let err = surveillance.classify(&output).unwrap_err();
        assert_eq!(err.stream, Stream::Stderr);

        // One in stdout leaves one for stderr
        let output = CapturedOutput::new("benign error\n", "benign error\n");
        assert!(surveillance.classify(&output).is_ok());

        // Three in stdout: the third is reported
        let output = CapturedOutput::new("benign error\nbenign error\nbenign error\n", "");
        let err = surveillance.classify(&output).unwrap_err();
        assert_eq!(err.stream, Stream::Stdout);
    }

    #[test]
    fn test_residual_applies_rules_in_order() {
        let mut surveillance = OutputSurveillance::new();
        surveillance
            .register_false_positive("^debug: .*$", RuleFlags::default(), 0)
            .unwrap();
        let output = CapturedOutput::new("debug: one\nkeep\ndebug: two\n", "");
        let residual = surveillance.residual(&output);
        assert_eq!(residual.stdout, b"\nkeep\n\n");
    }

    #[test]
    fn test_rules_are_purely_subtractive() {
        let mut surveillance = OutputSurveillance::new();
        surveillance
            .register_false_positive("nothing matches this", RuleFlags::default(), 0)
            .unwrap();
        let output = CapturedOutput::new("fine\n", "also fine\n");
        assert_eq!(surveillance.residual(&output), output);

        surveillance.clear();
        assert!(surveillance.rules().is_empty());
    }

    #[test]
    fn test_case_insensitive_rule_flag() {
        let mut surveillance = OutputSurveillance::new();
        let flags = RuleFlags {
            case_insensitive: true,
            ..RuleFlags::default()
        };
        surveillance
            .register_false_positive("KNOWN WARNING", flags, 0)
            .unwrap();
        let output = CapturedOutput::new("", "known warning\n");
        assert!(surveillance.classify(&output).is_ok());
    }

    #[test]
    fn test_classifies_output_with_invalid_utf8() {
        let surveillance = OutputSurveillance::new();
        let output = CapturedOutput::new(&b"readdir \xff\xfe\n"[..], &b"\xfferror: boom\n"[..]);
        let err = surveillance.classify(&output).unwrap_err();
        assert_eq!(err.stream, Stream::Stderr);
        assert_eq!(err.matched, "error");
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = FalsePositiveRule::new("(", RuleFlags::default(), 0);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }
}
