//! Set operations over node taints, keyed by taint key.
//!
//! A node holds at most one taint per key. Two taints with the same key but a
//! different value or effect are a [`TaintConflict`]: the caller's intended
//! taint disagrees with what the cluster already has, and nothing is merged.

use k8s_openapi::api::core::v1::Taint;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Scheduling effect of a taint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

impl TaintEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        }
    }

    /// Build a taint with this effect.
    pub fn taint(self, key: &str, value: Option<&str>) -> Taint {
        Taint {
            key: key.to_string(),
            value: value.map(str::to_string),
            effect: self.as_str().to_string(),
            ..Default::default()
        }
    }
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaintEffect {
    type Err = ParseTaintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NoSchedule" => Ok(TaintEffect::NoSchedule),
            "PreferNoSchedule" => Ok(TaintEffect::PreferNoSchedule),
            "NoExecute" => Ok(TaintEffect::NoExecute),
            other => Err(ParseTaintError::Effect(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseTaintError {
    #[error("taint '{0}' must have the form key[=value]:Effect")]
    Format(String),
    #[error("taint key must not be empty")]
    EmptyKey,
    #[error("unknown taint effect '{0}'")]
    Effect(String),
}

/// Parse a taint written as `key[=value]:Effect`.
pub fn parse_taint(s: &str) -> Result<Taint, ParseTaintError> {
    let (key_value, effect) = s
        .rsplit_once(':')
        .ok_or_else(|| ParseTaintError::Format(s.to_string()))?;
    let effect: TaintEffect = effect.parse()?;
    let (key, value) = match key_value.split_once('=') {
        Some((key, value)) => (key, Some(value)),
        None => (key_value, None),
    };
    if key.is_empty() {
        return Err(ParseTaintError::EmptyKey);
    }
    Ok(effect.taint(key, value))
}

/// A requested taint shares its key with an existing one but not its value or effect.
#[derive(Debug, Clone, Error, PartialEq)]
#[error(
    "conflicting taint on node '{node}' for key '{key}': node has {}, request has {}",
    describe(.existing),
    describe(.requested)
)]
pub struct TaintConflict {
    pub node: String,
    pub key: String,
    pub existing: Taint,
    pub requested: Taint,
}

impl TaintConflict {
    /// Attach the name of the node the conflict was found on.
    pub fn on_node(mut self, node: &str) -> Self {
        self.node = node.to_string();
        self
    }
}

/// Render a taint the way kubectl prints it: `key=value:Effect`.
pub fn describe(taint: &Taint) -> String {
    match taint.value.as_deref() {
        Some(value) if !value.is_empty() => format!("{}={}:{}", taint.key, value, taint.effect),
        _ => format!("{}:{}", taint.key, taint.effect),
    }
}

/// Same key, value and effect. An absent value equals an empty one and
/// `timeAdded` is not part of a taint's identity.
pub fn same_taint(a: &Taint, b: &Taint) -> bool {
    a.key == b.key
        && a.value.as_deref().unwrap_or_default() == b.value.as_deref().unwrap_or_default()
        && a.effect == b.effect
}

fn check(existing: &Taint, requested: &Taint) -> Result<(), TaintConflict> {
    if same_taint(existing, requested) {
        Ok(())
    } else {
        Err(TaintConflict {
            node: String::new(),
            key: existing.key.clone(),
            existing: existing.clone(),
            requested: requested.clone(),
        })
    }
}

/// `current` with every taint of `requested` added.
///
/// Keys already present with the same value and effect are kept once.
pub fn union(current: &[Taint], requested: &[Taint]) -> Result<Vec<Taint>, TaintConflict> {
    let mut merged = current.to_vec();
    for taint in requested {
        match merged.iter().find(|t| t.key == taint.key) {
            Some(existing) => check(existing, taint)?,
            None => merged.push(taint.clone()),
        }
    }
    Ok(merged)
}

/// `current` without the taints named in `to_remove`.
///
/// Removal must name the taint exactly, in every entry for its key; keys the
/// node does not carry are ignored.
pub fn difference(current: &[Taint], to_remove: &[Taint]) -> Result<Vec<Taint>, TaintConflict> {
    let mut remaining = Vec::with_capacity(current.len());
    for taint in current {
        let mut named = false;
        for requested in to_remove.iter().filter(|t| t.key == taint.key) {
            check(taint, requested)?;
            named = true;
        }
        if !named {
            remaining.push(taint.clone());
        }
    }
    Ok(remaining)
}
