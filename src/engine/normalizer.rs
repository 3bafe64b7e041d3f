//! Structure normalizer.
//!
//! Runs in two steps. A synchronous pre-order walk classifies every key, strips
//! prefixes and hands out placement tokens, leaving a plan with holes where
//! payloads go. The payloads are then resolved on a bounded pool and poured
//! back into the holes, so the result keeps the request's shape and order no
//! matter which resolver finishes first.

use std::collections::{BTreeMap, HashSet};

use futures::stream::{self, StreamExt, TryStreamExt};
use log::debug;

use super::classifier::{classify, TypedValue};
use super::resolvers;
use super::traits::AssetFetcher;
use super::value::{
    EmbeddedObject, Payload, PlacementToken, RawValue, RenderRequest, ResolvedValue, Scalar,
};
use super::EngineError;

enum Plan {
    Scalar(Scalar),
    Sequence(Vec<Plan>),
    Mapping(Vec<(String, Plan)>),
    /// Index into the task list.
    Pending(usize),
}

struct Task {
    path: String,
    payload: Payload,
    token: PlacementToken,
}

#[derive(Default)]
struct Planner {
    tasks: Vec<Task>,
}

impl Planner {
    fn pending(&mut self, path: String, payload: Payload) -> Plan {
        let idx = self.tasks.len();
        self.tasks.push(Task {
            path,
            payload,
            token: PlacementToken(idx as u32),
        });
        Plan::Pending(idx)
    }

    fn plan_mapping(
        &mut self,
        parent: &str,
        entries: &[(String, RawValue)],
    ) -> Result<Plan, EngineError> {
        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            let path = if parent.is_empty() {
                key.clone()
            } else {
                format!("{parent}.{key}")
            };
            let classified = classify(&path, key, value)?;
            if !seen.insert(classified.name) {
                return Err(EngineError::DuplicateVariable {
                    path,
                    name: classified.name.to_string(),
                });
            }

            let plan = match classified.value {
                TypedValue::Plain(raw) => self.plan_value(&path, raw)?,
                TypedValue::Payload(payload) => self.pending(path, payload),
                TypedValue::PayloadSequence(items) => Plan::Sequence(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, payload)| self.pending(format!("{path}[{i}]"), payload))
                        .collect(),
                ),
            };
            planned.push((classified.name.to_string(), plan));
        }

        Ok(Plan::Mapping(planned))
    }

    fn plan_value(&mut self, path: &str, value: &RawValue) -> Result<Plan, EngineError> {
        match value {
            RawValue::Scalar(scalar) => Ok(Plan::Scalar(scalar.clone())),
            RawValue::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.plan_value(&format!("{path}[{i}]"), item))
                .collect::<Result<Vec<_>, _>>()
                .map(Plan::Sequence),
            RawValue::Mapping(entries) => self.plan_mapping(path, entries),
        }
    }
}

fn fill(plan: Plan, objects: &mut [Option<EmbeddedObject>]) -> Result<ResolvedValue, EngineError> {
    Ok(match plan {
        Plan::Scalar(scalar) => ResolvedValue::Scalar(scalar),
        Plan::Sequence(items) => ResolvedValue::Sequence(
            items
                .into_iter()
                .map(|item| fill(item, objects))
                .collect::<Result<_, _>>()?,
        ),
        Plan::Mapping(entries) => ResolvedValue::Mapping(
            entries
                .into_iter()
                .map(|(name, item)| Ok((name, fill(item, objects)?)))
                .collect::<Result<BTreeMap<_, _>, EngineError>>()?,
        ),
        Plan::Pending(idx) => ResolvedValue::Object(
            objects
                .get_mut(idx)
                .and_then(Option::take)
                .ok_or_else(|| {
                    EngineError::RenderAssembly(format!("resolved object {idx} is missing"))
                })?,
        ),
    })
}

/// Resolve every payload in `request`, at most `concurrency` at a time.
///
/// Returns a mapping keyed by bare variable names. The first failing payload
/// aborts the call with its key path.
pub async fn normalize(
    request: &RenderRequest,
    fetcher: &dyn AssetFetcher,
    concurrency: usize,
) -> Result<ResolvedValue, EngineError> {
    let mut planner = Planner::default();
    let plan = planner.plan_mapping("", &request.entries)?;
    let tasks = planner.tasks;
    debug!(
        "Resolving {} payloads with concurrency {}",
        tasks.len(),
        concurrency
    );

    let objects: Vec<EmbeddedObject> = stream::iter(tasks.into_iter().map(|task| async move {
        resolvers::resolve(&task.payload, task.token, fetcher)
            .await
            .map_err(|source| EngineError::Resolution {
                key: task.path,
                source,
            })
    }))
    .buffered(concurrency.max(1))
    .try_collect()
    .await?;

    let mut slots: Vec<Option<EmbeddedObject>> = objects.into_iter().map(Some).collect();
    fill(plan, &mut slots)
}
