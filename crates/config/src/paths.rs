//! Path template resolution.
//!
//! Templates use `@NAME@` placeholders. A placeholder is filled from the
//! explicit [`Bindings`] first, then from the named path templates of the
//! host (which may themselves contain placeholders).

use crate::error::{ConfigError, Result, UnresolvedVariableError};
use crate::host::HostProfile;
use crate::resolved::ResolvedConfig;
use chrono::{Datelike, Timelike};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use surfexp_core::{compact_dtg, decade, Dtg, MemberId};

const MAX_DEPTH: usize = 8;
const PLACEHOLDER: &str = r"@([A-Za-z0-9_]+)@";

/// Variable bindings for template resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: BTreeMap<String, String>,
}

impl Bindings {
    /// Empty bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Builder form of [`Bindings::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Experiment name (`EXP`).
    pub fn experiment(self, name: &str) -> Self {
        self.with("EXP", name)
    }

    /// Cycle time placeholders: `YYYY`, `MM`, `DD`, `HH`, `mm`, `BASETIME`, `DECADE`.
    pub fn cycle(self, dtg: &Dtg) -> Self {
        self.with("YYYY", format!("{:04}", dtg.year()))
            .with("MM", format!("{:02}", dtg.month()))
            .with("DD", format!("{:02}", dtg.day()))
            .with("HH", format!("{:02}", dtg.hour()))
            .with("mm", format!("{:02}", dtg.minute()))
            .with("BASETIME", compact_dtg(dtg))
            .with("DECADE", decade(dtg))
    }

    /// Member placeholders `EEE` (e.g. `mbr001`) and `MEMBER` (e.g. `001`).
    ///
    /// The control member has no suffix unless ensemble mode is enabled.
    pub fn member(self, member: Option<MemberId>, ensemble_mode: bool) -> Self {
        match member {
            Some(m) if ensemble_mode || !m.is_control() => self
                .with("EEE", m.to_string())
                .with("MEMBER", format!("{:03}", m.0)),
            _ => self.with("EEE", "").with("MEMBER", ""),
        }
    }

    /// Look up a variable. Exact match first, then case-insensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str).or_else(|| {
            self.values
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        })
    }

    /// All bindings, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Resolves path templates against a host profile and configured paths.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    templates: BTreeMap<String, String>,
}

impl PathResolver {
    /// Resolver with the path templates of a host.
    pub fn new(host: Option<&HostProfile>) -> Self {
        let templates = host
            .map(|h| {
                h.paths
                    .iter()
                    .map(|(k, v)| (k.to_uppercase(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Self { templates }
    }

    /// Add the `system.*` string entries of a configuration as named
    /// templates (`system.archive_dir` becomes `@ARCHIVE_DIR@`). These
    /// override host templates of the same name.
    pub fn with_system_paths(mut self, config: &ResolvedConfig) -> Self {
        for (key, value) in config.string_leaves("system") {
            self.templates
                .insert(key.replace('.', "_").to_uppercase(), value);
        }
        self
    }

    /// Add one named template.
    pub fn with_template(mut self, key: &str, template: impl Into<String>) -> Self {
        self.templates.insert(key.to_uppercase(), template.into());
        self
    }

    /// Raw template for a name.
    pub fn template(&self, key: &str) -> Option<&str> {
        self.templates.get(&key.to_uppercase()).map(String::as_str)
    }

    /// Substitute every placeholder of `template`.
    pub fn expand(&self, template: &str, bindings: &Bindings) -> Result<String> {
        let re = Regex::new(PLACEHOLDER).map_err(|e| ConfigError::invalid("placeholder", e.to_string()))?;
        self.expand_at(&re, template, bindings, 0)
    }

    /// Substitute every placeholder and require an absolute path.
    pub fn resolve(&self, template: &str, bindings: &Bindings) -> Result<PathBuf> {
        let expanded = collapse_slashes(&self.expand(template, bindings)?);
        if !expanded.starts_with('/') {
            return Err(ConfigError::NotAbsolute(expanded));
        }
        Ok(PathBuf::from(expanded))
    }

    /// Resolve a named template (`wrk`, `archive_dir`, ...).
    pub fn resolve_named(&self, key: &str, bindings: &Bindings) -> Result<PathBuf> {
        let template = self.template(key).ok_or_else(|| UnresolvedVariableError {
            template: format!("@{}@", key.to_uppercase()),
            variable: key.to_uppercase(),
        })?;
        self.resolve(template, bindings)
    }

    fn expand_at(&self, re: &Regex, template: &str, bindings: &Bindings, depth: usize) -> Result<String> {
        if depth > MAX_DEPTH {
            return Err(ConfigError::RecursiveTemplate(template.to_string()));
        }
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in re.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            let name = name.as_str();
            if let Some(value) = bindings.get(name) {
                out.push_str(value);
            } else if let Some(inner) = self.template(name) {
                out.push_str(&self.expand_at(re, inner, bindings, depth + 1)?);
            } else {
                return Err(UnresolvedVariableError {
                    template: template.to_string(),
                    variable: name.to_string(),
                }
                .into());
            }
            last = whole.end();
        }
        out.push_str(&template[last..]);
        Ok(out)
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use surfexp_core::parse_dtg;

    fn host() -> HostProfile {
        HostProfile::new("test")
            .with_path("scratch", "/scratch/user")
            .with_path("exp_dir", "@SCRATCH@/sfx_exp/@EXP@")
            .with_path("wrk", "@EXP_DIR@/@YYYY@@MM@@DD@_@HH@/@EEE@")
    }

    fn bindings(member: Option<MemberId>, ensemble: bool) -> Bindings {
        Bindings::new()
            .experiment("demo")
            .cycle(&parse_dtg("2022020103").unwrap())
            .member(member, ensemble)
    }

    #[test]
    fn test_resolve_named_host_templates() {
        let resolver = PathResolver::new(Some(&host()));
        let path = resolver.resolve_named("wrk", &bindings(None, false)).unwrap();
        assert_eq!(path, PathBuf::from("/scratch/user/sfx_exp/demo/20220201_03"));

        let path = resolver
            .resolve_named("wrk", &bindings(Some(MemberId(2)), true))
            .unwrap();
        assert_eq!(
            path,
            PathBuf::from("/scratch/user/sfx_exp/demo/20220201_03/mbr002")
        );
    }

    #[test]
    fn test_control_member_has_no_suffix_without_ensemble_mode() {
        let resolver = PathResolver::new(Some(&host()));
        let plain = resolver.resolve_named("wrk", &bindings(Some(MemberId(0)), false)).unwrap();
        let ens = resolver.resolve_named("wrk", &bindings(Some(MemberId(0)), true)).unwrap();
        assert!(plain.ends_with("20220201_03"));
        assert!(ens.ends_with("mbr000"));
    }

    #[test]
    fn test_unresolved_variable() {
        let resolver = PathResolver::new(None);
        let err = resolver.resolve("/data/@NOPE@/x", &Bindings::new()).unwrap_err();
        match err {
            ConfigError::UnresolvedVariable(e) => assert_eq!(e.variable, "NOPE"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_not_absolute_and_recursion() {
        let resolver = PathResolver::new(None)
            .with_template("a", "@B@")
            .with_template("b", "@A@");
        assert!(matches!(
            resolver.resolve("rel/@YYYY@", &Bindings::new().with("YYYY", "2022")),
            Err(ConfigError::NotAbsolute(_))
        ));
        assert!(matches!(
            resolver.expand("@A@", &Bindings::new()),
            Err(ConfigError::RecursiveTemplate(_))
        ));
    }

    #[test]
    fn test_minute_and_month_are_distinct() {
        let b = Bindings::new().cycle(&parse_dtg("202202010330").unwrap());
        let resolver = PathResolver::new(None);
        assert_eq!(resolver.expand("@MM@:@mm@", &b).unwrap(), "02:30");
        assert_eq!(resolver.expand("@DECADE@", &b).unwrap(), "0205");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = PathResolver::new(Some(&host()));
        let b = bindings(Some(MemberId(1)), false);
        assert_eq!(
            resolver.resolve_named("wrk", &b).unwrap(),
            resolver.resolve_named("wrk", &b).unwrap()
        );
    }
}
