//! Lifecycle of computed-field definitions.
//!
//! A definition moves `Draft -> Validated -> Committed`. Validation runs
//! the expression through `process_expression` against current field
//! metadata; committing makes the field available to workflows and hands
//! back the keys of dependent computed fields so the caller can recompile
//! anything referencing them. A field still referenced by a consumer
//! cannot be removed.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::workflow::{
    process_expression, CompileError, CompileResult, ExpressionConfig, FieldTransform,
};

use super::expression::Expression;
use super::field::Field;

/// Stage of a computed-field definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputedFieldStage {
    Draft,
    Validated,
    Committed,
}

/// A derived-field definition owned by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedFieldDef {
    pub key: String,
    pub name: String,
    pub expression: Expression,
    pub stage: ComputedFieldStage,
}

/// Registry of computed fields with usage tracking.
#[derive(Debug, Default)]
pub struct ComputedFieldRegistry {
    defs: Vec<ComputedFieldDef>,
    /// Field key -> ids of consumers (charts) referencing it.
    usage: HashMap<String, HashSet<String>>,
}

impl ComputedFieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new definition in the `Draft` stage.
    pub fn draft(
        &mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        expression: Expression,
    ) -> CompileResult<()> {
        let key = key.into();
        if self.defs.iter().any(|d| d.key == key) {
            return Err(CompileError::DuplicateField(key));
        }
        self.defs.push(ComputedFieldDef {
            key,
            name: name.into(),
            expression,
            stage: ComputedFieldStage::Draft,
        });
        Ok(())
    }

    /// Validate a draft against current field metadata, storing the
    /// processed expression.
    pub fn validate(
        &mut self,
        key: &str,
        all_fields: &[Field],
        config: &ExpressionConfig,
    ) -> CompileResult<()> {
        let idx = self.index_of(key)?;
        let processed = process_expression(&self.defs[idx].expression, all_fields, config)?;
        let def = &mut self.defs[idx];
        def.expression = processed;
        def.stage = ComputedFieldStage::Validated;
        Ok(())
    }

    /// Commit a validated definition.
    ///
    /// Returns the keys of computed fields that (transitively) reference
    /// the committed one; workflows using any of them must be recompiled.
    pub fn commit(&mut self, key: &str) -> CompileResult<Vec<String>> {
        let idx = self.index_of(key)?;
        if self.defs[idx].stage == ComputedFieldStage::Draft {
            return Err(CompileError::NotValidated(key.to_string()));
        }
        self.defs[idx].stage = ComputedFieldStage::Committed;
        Ok(self.dependents(key))
    }

    /// Remove a definition. Fails while any consumer still references it.
    pub fn remove(&mut self, key: &str) -> CompileResult<ComputedFieldDef> {
        if let Some(consumers) = self.usage.get(key) {
            if !consumers.is_empty() {
                let mut consumers: Vec<String> = consumers.iter().cloned().collect();
                consumers.sort();
                return Err(CompileError::FieldInUse {
                    field: key.to_string(),
                    consumers,
                });
            }
        }
        let idx = self.index_of(key)?;
        self.usage.remove(key);
        Ok(self.defs.remove(idx))
    }

    /// Record that `consumer` references `key`.
    pub fn register_use(&mut self, key: &str, consumer: impl Into<String>) {
        self.usage
            .entry(key.to_string())
            .or_default()
            .insert(consumer.into());
    }

    /// Drop a consumer's reference to `key`.
    pub fn release_use(&mut self, key: &str, consumer: &str) {
        if let Some(consumers) = self.usage.get_mut(key) {
            consumers.remove(consumer);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ComputedFieldDef> {
        self.defs.iter().find(|d| d.key == key)
    }

    /// Committed definitions as workflow transform entries, in
    /// registration order.
    pub fn committed(&self) -> Vec<FieldTransform> {
        self.defs
            .iter()
            .filter(|d| d.stage == ComputedFieldStage::Committed)
            .map(|d| FieldTransform {
                key: d.key.clone(),
                expression: d.expression.clone(),
            })
            .collect()
    }

    /// Keys of computed fields that transitively reference `key`.
    fn dependents(&self, key: &str) -> Vec<String> {
        let mut affected: HashSet<String> = HashSet::new();
        affected.insert(key.to_string());
        // Fixed point over direct references; the reference graph is
        // acyclic by invariant.
        loop {
            let mut grew = false;
            for def in &self.defs {
                if affected.contains(&def.key) {
                    continue;
                }
                if def
                    .expression
                    .referenced_fields()
                    .iter()
                    .any(|f| affected.contains(f))
                {
                    affected.insert(def.key.clone());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        affected.remove(key);
        let mut out: Vec<String> = affected.into_iter().collect();
        out.sort();
        out
    }

    fn index_of(&self, key: &str) -> CompileResult<usize> {
        self.defs
            .iter()
            .position(|d| d.key == key)
            .ok_or_else(|| CompileError::UnknownField(key.to_string()))
    }
}
