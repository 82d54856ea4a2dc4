use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use fnemu_core::model::RESOURCE_TYPE;
use fnemu_core::{CallResult, FunctionDescriptor, FunctionName, StructuredError, Trigger};

use crate::{ClientConfig, TransportClient, TransportFuture, TransportMode};

/// In-process stand-in for a running emulator.
///
/// Keeps deployed functions in a map ordered by name and applies the same
/// error semantics as the wire clients. Health can be toggled to simulate an
/// emulator that is starting, running, or gone.
pub struct MemoryTransport {
    project_id: String,
    region: String,
    http_base: String,
    healthy: AtomicBool,
    probes: AtomicUsize,
    deletes: AtomicUsize,
    functions: Mutex<BTreeMap<String, FunctionDescriptor>>,
}

impl MemoryTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            project_id: config.project_id.clone(),
            region: config.region.clone(),
            http_base: config.endpoint(),
            healthy: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            functions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of health probes answered so far (successful or not).
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of successful deletes.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn qualify(&self, name: &str) -> String {
        FunctionName::format(&self.project_id, &self.region, FunctionName::short(name))
    }

    fn not_found(&self, name: &str) -> StructuredError {
        let qualified = self.qualify(name);
        StructuredError::not_found(format!("Function {} not found.", FunctionName::short(name)))
            .with_resource_info(RESOURCE_TYPE, qualified)
    }

    fn functions(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, FunctionDescriptor>> {
        self.functions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TransportClient for MemoryTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Rest
    }

    fn test_connection(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StructuredError::internal(format!(
                    "Failed to reach emulator at {}",
                    self.http_base
                )))
            }
        })
    }

    fn list_functions(&self) -> TransportFuture<'_, Vec<FunctionDescriptor>> {
        Box::pin(async move { Ok(self.functions().values().cloned().collect()) })
    }

    fn get_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, FunctionDescriptor> {
        Box::pin(async move {
            self.functions()
                .get(&self.qualify(name))
                .cloned()
                .ok_or_else(|| self.not_found(name))
        })
    }

    fn create_function<'a>(
        &'a self,
        function: &'a FunctionDescriptor,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            function.validate_for_create()?;

            let mut functions = self.functions();
            if functions.contains_key(&function.name) {
                return Err(StructuredError::conflict(format!(
                    "Function {} already exists.",
                    function.short_name()
                ))
                .with_resource_info(RESOURCE_TYPE, function.name.clone()));
            }

            let mut stored = function.clone();
            if let Some(Trigger::Http { url }) = &mut stored.trigger {
                url.get_or_insert_with(|| {
                    format!(
                        "{}/{}/{}/{}",
                        self.http_base,
                        self.project_id,
                        self.region,
                        function.short_name()
                    )
                });
            }
            functions.insert(stored.name.clone(), stored);
            Ok(())
        })
    }

    fn delete_function<'a>(&'a self, name: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.functions()
                .remove(&self.qualify(name))
                .ok_or_else(|| self.not_found(name))?;
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn call_function<'a>(
        &'a self,
        name: &'a str,
        data: &'a serde_json::Value,
    ) -> TransportFuture<'a, CallResult> {
        Box::pin(async move {
            if !self.functions().contains_key(&self.qualify(name)) {
                return Err(self.not_found(name));
            }
            Ok(CallResult {
                execution_id: uuid::Uuid::new_v4().simple().to_string(),
                result: Some(data.to_string()),
                error: None,
            })
        })
    }
}
