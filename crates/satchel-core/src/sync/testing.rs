//! Scripted in-process gateway for pusher and orchestrator tests

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::gateway::{
    ColumnRepair, GatewayError, InitOutcome, PushAck, RemoteCredentials, RemoteGateway,
};
use crate::models::RemoteRow;

type PushHook = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Blocks pushes until released, to hold a sync run in flight.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
struct Script {
    rows: HashMap<String, Vec<RemoteRow>>,
    push_failures: HashMap<usize, GatewayError>,
    pull_failures: HashMap<String, GatewayError>,
    pushes: Vec<(String, Vec<Value>, bool)>,
    pulls: Vec<String>,
    repairs: Vec<String>,
    rescued: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
    offline: AtomicBool,
    network_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Gate>>>,
    push_hook: Mutex<Option<Arc<PushHook>>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, collection: &str, rows: Vec<RemoteRow>) {
        self.script
            .lock()
            .unwrap()
            .rows
            .insert(collection.to_string(), rows);
    }

    /// Fail the push call with this zero-based index.
    pub fn fail_push(&self, call: usize, error: GatewayError) {
        self.script.lock().unwrap().push_failures.insert(call, error);
    }

    pub fn fail_pull(&self, collection: &str, error: GatewayError) {
        self.script
            .lock()
            .unwrap()
            .pull_failures
            .insert(collection.to_string(), error);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn on_push<F>(&self, hook: F)
    where
        F: Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static,
    {
        *self.push_hook.lock().unwrap() = Some(Arc::new(Box::new(hook)));
    }

    pub fn network_calls(&self) -> usize {
        self.network_calls.load(Ordering::Relaxed)
    }

    pub fn push_calls(&self) -> usize {
        self.script.lock().unwrap().pushes.len()
    }

    pub fn pull_calls(&self) -> usize {
        self.script.lock().unwrap().pulls.len()
    }

    pub fn pulled_collections(&self) -> Vec<String> {
        self.script.lock().unwrap().pulls.clone()
    }

    pub fn pushed_collections(&self) -> Vec<String> {
        self.script
            .lock()
            .unwrap()
            .pushes
            .iter()
            .map(|(collection, _, _)| collection.clone())
            .collect()
    }

    pub fn pushed_items(&self) -> Vec<Vec<Value>> {
        self.script
            .lock()
            .unwrap()
            .pushes
            .iter()
            .map(|(_, items, _)| items.clone())
            .collect()
    }

    pub fn pushed_ids(&self) -> Vec<Vec<String>> {
        self.pushed_items()
            .iter()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["id"].as_str().map(str::to_string))
                    .collect()
            })
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.pushed_items().iter().map(Vec::len).collect()
    }

    pub fn forced_flags(&self) -> Vec<bool> {
        self.script
            .lock()
            .unwrap()
            .pushes
            .iter()
            .map(|(_, _, force)| *force)
            .collect()
    }

    pub fn repaired_columns(&self) -> Vec<String> {
        self.script.lock().unwrap().repairs.clone()
    }

    pub fn self_rescued_ids(&self) -> Vec<String> {
        self.script.lock().unwrap().rescued.clone()
    }

    fn guard_offline(&self) -> Result<(), GatewayError> {
        if self.is_offline() {
            return Err(GatewayError::Offline);
        }
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn apply(&self, collection: &str, items: &[Value]) {
        let mut script = self.script.lock().unwrap();
        let rows = script.rows.entry(collection.to_string()).or_default();
        for item in items {
            let Some(mut data) = item.as_object().cloned() else {
                continue;
            };
            let id = data
                .remove("id")
                .and_then(|id| id.as_str().map(str::to_string))
                .unwrap_or_default();
            let version = data.remove("version").and_then(|v| v.as_i64()).unwrap_or(1);
            let row = RemoteRow {
                id: id.clone(),
                data,
                updated_at: 0,
                version,
            };
            match rows.iter_mut().find(|existing| existing.id == id) {
                Some(existing) => *existing = row,
                None => rows.push(row),
            }
        }
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    async fn check(&self, _credentials: Option<&RemoteCredentials>) -> bool {
        self.guard_offline().is_ok()
    }

    async fn init(
        &self,
        _credentials: Option<&RemoteCredentials>,
    ) -> Result<InitOutcome, GatewayError> {
        self.guard_offline()?;
        Ok(InitOutcome {
            success: true,
            message: "Schema ready".to_string(),
            details: Vec::new(),
        })
    }

    async fn push(
        &self,
        collection: &str,
        items: &[Value],
        force: bool,
    ) -> Result<PushAck, GatewayError> {
        self.guard_offline()?;
        let call = {
            let mut script = self.script.lock().unwrap();
            script
                .pushes
                .push((collection.to_string(), items.to_vec(), force));
            script.pushes.len() - 1
        };

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let hook = self.push_hook.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook().await;
        }

        let failure = self.script.lock().unwrap().push_failures.remove(&call);
        if let Some(error) = failure {
            return Err(error);
        }
        self.apply(collection, items);
        Ok(PushAck {
            processed: items.len(),
        })
    }

    async fn push_self_rescue(&self, collection: &str, item: Value) -> Result<PushAck, GatewayError> {
        self.guard_offline()?;
        let id = item["id"].as_str().unwrap_or_default().to_string();
        self.script.lock().unwrap().rescued.push(id);
        self.apply(collection, std::slice::from_ref(&item));
        Ok(PushAck { processed: 1 })
    }

    async fn pull(&self, collection: &str) -> Result<Vec<RemoteRow>, GatewayError> {
        self.guard_offline()?;
        let mut script = self.script.lock().unwrap();
        script.pulls.push(collection.to_string());
        if let Some(error) = script.pull_failures.get(collection) {
            return Err(error.clone());
        }
        Ok(script.rows.get(collection).cloned().unwrap_or_default())
    }

    async fn add_column(&self, _collection: &str, repair: &ColumnRepair) -> Result<(), GatewayError> {
        self.guard_offline()?;
        self.script.lock().unwrap().repairs.push(repair.column.clone());
        Ok(())
    }
}
