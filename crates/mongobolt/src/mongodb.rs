//! MongoDB operation surface for Python
//!
//! Every operation follows the same lock discipline: Python values are
//! extracted while the GIL is held, the returned future encodes, talks to
//! the driver and decodes with the GIL released, and a single re-entry
//! materialises the results. BSON never crosses into Python.

use bson::{oid::ObjectId, Bson, Document as BsonDocument};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};
use pyo3_async_runtimes::tokio::future_into_py;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use mongobolt_mongodb::connection::{self, Connection, PoolConfig};
use mongobolt_mongodb::convert::{fields_to_bson_document, DocumentFields};
use mongobolt_mongodb::links::{self, LinkField};
use mongobolt_mongodb::ops::{self, FindSpec};
use mongobolt_mongodb::schema::{self, DocumentSchema};
use mongobolt_mongodb::state::StateTracker as EngineStateTracker;

use crate::config::get_config;
use crate::conversion::{extract_document, extracted_to_py, fields_to_py_dict};
use crate::error_handling::bolt_to_pyerr;

// Current connection: the registry in the engine dedups pools per URL; this
// holds the one the module-level functions talk to.
static CONNECTION: StdRwLock<Option<(String, Arc<Connection>)>> = StdRwLock::new(None);

/// Get the current connection, returning an error if not initialized
fn get_connection() -> PyResult<Arc<Connection>> {
    CONNECTION
        .read()
        .map_err(|e| PyRuntimeError::new_err(format!("Connection lock poisoned: {}", e)))?
        .as_ref()
        .map(|(_, conn)| conn.clone())
        .ok_or_else(|| PyRuntimeError::new_err("MongoDB not initialized. Call init() first."))
}

fn timeout_from_ms(timeout_ms: Option<u64>) -> Option<Duration> {
    timeout_ms.map(Duration::from_millis)
}

fn pool_config_from_options(options: Option<&Bound<'_, PyDict>>) -> PyResult<PoolConfig> {
    let mut config = PoolConfig::default();
    let Some(opts) = options else {
        return Ok(config);
    };
    if let Some(value) = opts.get_item("min_pool_size")? {
        config.min_pool_size = Some(value.extract()?);
    }
    if let Some(value) = opts.get_item("max_pool_size")? {
        config.max_pool_size = Some(value.extract()?);
    }
    if let Some(value) = opts.get_item("connect_timeout_ms")? {
        config.connect_timeout = Some(Duration::from_millis(value.extract()?));
    }
    if let Some(value) = opts.get_item("socket_timeout_ms")? {
        config.operation_timeout = Some(Duration::from_millis(value.extract()?));
    }
    if let Some(value) = opts.get_item("server_selection_timeout_ms")? {
        config.server_selection_timeout = Some(Duration::from_millis(value.extract()?));
    }
    if let Some(value) = opts.get_item("parallel_threshold")? {
        config.parallel_threshold = value.extract()?;
    }
    if let Some(value) = opts.get_item("app_name")? {
        config.app_name = Some(value.extract()?);
    }
    Ok(config)
}

/// Initialize the MongoDB connection
///
/// Args:
///     url: MongoDB connection URI (e.g. "mongodb://localhost:27017/mydb")
///     options: optional dict with min_pool_size, max_pool_size,
///         connect_timeout_ms, socket_timeout_ms,
///         server_selection_timeout_ms, parallel_threshold, app_name
///
/// Raises:
///     RuntimeError: if already initialized or the connection fails
#[pyfunction]
#[pyo3(signature = (url, options=None))]
fn init<'py>(
    py: Python<'py>,
    url: String,
    options: Option<&Bound<'_, PyDict>>,
) -> PyResult<Bound<'py, PyAny>> {
    let config = pool_config_from_options(options)?;
    future_into_py(py, async move {
        {
            let read_lock = CONNECTION
                .read()
                .map_err(|e| PyRuntimeError::new_err(format!("Connection lock poisoned: {}", e)))?;
            if read_lock.is_some() {
                return Err(PyRuntimeError::new_err(
                    "MongoDB already initialized. Call close() first to reinitialize.",
                ));
            }
        }

        let conn = connection::get_or_create(&url, config)
            .await
            .map_err(bolt_to_pyerr)?;

        let mut write_lock = CONNECTION
            .write()
            .map_err(|e| PyRuntimeError::new_err(format!("Connection lock poisoned: {}", e)))?;
        *write_lock = Some((url, conn));
        Ok(())
    })
}

/// Get connection status
#[pyfunction]
fn is_connected() -> bool {
    CONNECTION
        .read()
        .ok()
        .map(|lock| lock.is_some())
        .unwrap_or(false)
}

/// Close the current connection. After this, init() can be called again,
/// possibly against a different cluster.
#[pyfunction]
fn close(py: Python<'_>) -> PyResult<Bound<'_, PyAny>> {
    future_into_py(py, async move {
        let mut write_lock = CONNECTION
            .write()
            .map_err(|e| PyRuntimeError::new_err(format!("Connection lock poisoned: {}", e)))?;
        match write_lock.take() {
            Some((url, _)) => {
                connection::remove_pool(&url);
                Ok(())
            }
            None => Err(PyRuntimeError::new_err("No active connection to close")),
        }
    })
}

/// Clear the connection synchronously. Testing convenience; production code
/// should prefer close().
#[pyfunction]
fn reset() -> PyResult<()> {
    let mut write_lock = CONNECTION
        .write()
        .map_err(|e| PyRuntimeError::new_err(format!("Connection lock poisoned: {}", e)))?;
    if let Some((url, _)) = write_lock.take() {
        connection::remove_pool(&url);
    }
    Ok(())
}

/// Ping the server over the current connection
#[pyfunction]
fn ping(py: Python<'_>) -> PyResult<Bound<'_, PyAny>> {
    let conn = get_connection()?;
    future_into_py(py, async move {
        conn.ping().await.map_err(bolt_to_pyerr)
    })
}

/// Register the schema of a document class
///
/// Args:
///     class_name: fully qualified class name ("app.models.User")
///     schema_shape: mapping of field name to type shape, e.g.
///         {"email": {"type": "string", "constraints": {"format": "email"}},
///          "age": {"type": "optional", "inner": {"type": "int64"}}}
///
/// Re-registration overwrites the cached schema (interactive redefinition).
#[pyfunction]
fn register_schema(
    py: Python<'_>,
    class_name: String,
    schema_shape: &Bound<'_, PyDict>,
) -> PyResult<()> {
    if class_name.is_empty() {
        return Err(PyValueError::new_err("class name cannot be empty"));
    }
    let config = get_config();
    let shape = extract_document(py, schema_shape, &config)?;
    let parsed = DocumentSchema::from_shape(&shape).map_err(bolt_to_pyerr)?;
    schema::register_schema(&class_name, parsed).map_err(bolt_to_pyerr)
}

/// Register the reference fields of a collection for fetch_links
///
/// Args:
///     collection: source collection name
///     link_specs: list of (field_name, target_collection) pairs
#[pyfunction]
fn register_links(collection: String, link_specs: Vec<(String, String)>) -> PyResult<()> {
    let specs = link_specs
        .into_iter()
        .map(|(field, target)| LinkField { field, target })
        .collect();
    links::register_links(&collection, specs).map_err(bolt_to_pyerr)
}

/// Insert a single document
///
/// With class_name given, the document is validated against the registered
/// schema before anything reaches the driver; every violation is reported.
///
/// Returns:
///     The generated or provided id as a string
#[pyfunction]
#[pyo3(signature = (collection, document, class_name=None, timeout_ms=None))]
fn insert_one<'py>(
    py: Python<'py>,
    collection: String,
    document: &Bound<'_, PyDict>,
    class_name: Option<String>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let fields = extract_document(py, document, &config)?;
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        ops::insert_one(&conn, &collection, fields, class_name.as_deref(), timeout)
            .await
            .map_err(bolt_to_pyerr)
    })
}

/// Insert a batch of documents in one driver call
///
/// Args:
///     collection: target collection
///     documents: list of dicts
///     class_name: schema key, required when validate=True
///     validate: validate every document; the whole batch fails on any error
///     ordered: ordered driver semantics (stop at first write error)
///     return_kind: "ids" (default) or "documents"
///     document_class: class instantiated for return_kind="documents"
///
/// Returns:
///     List of id strings in input order, or constructed document objects
#[pyfunction]
#[pyo3(signature = (collection, documents, class_name=None, validate=false, ordered=true,
                    return_kind="ids", document_class=None, timeout_ms=None))]
#[allow(clippy::too_many_arguments)]
fn insert_many<'py>(
    py: Python<'py>,
    collection: String,
    documents: &Bound<'_, PyList>,
    class_name: Option<String>,
    validate: bool,
    ordered: bool,
    return_kind: &str,
    document_class: Option<Bound<'py, PyAny>>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let return_documents = match return_kind {
        "ids" => false,
        "documents" => true,
        other => {
            return Err(PyValueError::new_err(format!(
                "invalid return_kind '{}' (expected 'ids' or 'documents')",
                other
            )))
        }
    };
    if return_documents && document_class.is_none() {
        return Err(PyValueError::new_err(
            "return_kind='documents' requires document_class",
        ));
    }

    let conn = get_connection()?;
    let config = get_config();

    // Phase 1: extract everything while the GIL is held
    let mut batch: Vec<DocumentFields> = Vec::with_capacity(documents.len());
    for item in documents.iter() {
        let dict = item
            .downcast::<PyDict>()
            .map_err(|_| PyValueError::new_err("all items must be dicts"))?;
        batch.push(extract_document(py, dict, &config)?);
    }

    let retained_inputs = return_documents.then(|| batch.clone());
    let doc_class = document_class.map(|class| class.unbind());
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        // Empty input: empty result of the requested kind, no driver call
        if batch.is_empty() {
            return Python::with_gil(|py| Ok(PyList::empty(py).into_any().unbind()));
        }

        let ids = ops::insert_many(
            &conn,
            &collection,
            batch,
            class_name.as_deref(),
            validate,
            ordered,
            timeout,
        )
        .await
        .map_err(bolt_to_pyerr)?;

        Python::with_gil(|py| {
            match retained_inputs {
                Some(inputs) => {
                    // Construct document objects natively, attaching ids by index
                    let class = doc_class
                        .as_ref()
                        .ok_or_else(|| PyRuntimeError::new_err("document_class missing"))?
                        .bind(py);
                    let out = PyList::empty(py);
                    for (index, fields) in inputs.into_iter().enumerate() {
                        let data = fields_to_py_dict(py, fields)?;
                        let instance = class.call0()?;
                        match ids.get(index) {
                            Some(id) => instance.setattr("_id", id)?,
                            None => instance.setattr("_id", py.None())?,
                        }
                        instance.setattr("_data", data)?;
                        out.append(instance)?;
                    }
                    Ok(out.into_any().unbind())
                }
                None => Ok(PyList::new(py, &ids)?.into_any().unbind()),
            }
        })
    })
}

/// Find the first document matching the filter, as a dict (or None)
#[pyfunction]
#[pyo3(signature = (collection, filter=None, timeout_ms=None))]
fn find_one<'py>(
    py: Python<'py>,
    collection: String,
    filter: Option<&Bound<'_, PyDict>>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let filter_fields = match filter {
        Some(dict) => extract_document(py, dict, &config)?,
        None => Vec::new(),
    };
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        let filter_doc = fields_to_bson_document(filter_fields);
        let found = ops::find_one(&conn, &collection, filter_doc, timeout)
            .await
            .map_err(bolt_to_pyerr)?;
        match found {
            Some(fields) => Python::with_gil(|py| Ok(Some(fields_to_py_dict(py, fields)?))),
            None => Ok(None),
        }
    })
}

fn extract_find_inputs(
    py: Python<'_>,
    filter: Option<&Bound<'_, PyDict>>,
    sort: Option<&Bound<'_, PyDict>>,
) -> PyResult<(DocumentFields, Option<DocumentFields>)> {
    let config = get_config();
    let filter_fields = match filter {
        Some(dict) => extract_document(py, dict, &config)?,
        None => Vec::new(),
    };
    let sort_fields = match sort {
        Some(dict) => Some(extract_document(py, dict, &config)?),
        None => None,
    };
    Ok((filter_fields, sort_fields))
}

/// Find documents and return them as raw dicts
///
/// `_id` is always the first key of each returned dict, rendered as a
/// 24-character hex string.
#[pyfunction]
#[pyo3(signature = (collection, filter=None, sort=None, skip=None, limit=None, timeout_ms=None))]
fn find_as_dicts<'py>(
    py: Python<'py>,
    collection: String,
    filter: Option<&Bound<'_, PyDict>>,
    sort: Option<&Bound<'_, PyDict>>,
    skip: Option<u64>,
    limit: Option<i64>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let (filter_fields, sort_fields) = extract_find_inputs(py, filter, sort)?;
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        let spec = FindSpec {
            filter: fields_to_bson_document(filter_fields),
            sort: sort_fields.map(fields_to_bson_document),
            skip,
            limit,
        };
        let results = ops::find(&conn, &collection, spec, timeout)
            .await
            .map_err(bolt_to_pyerr)?;

        Python::with_gil(|py| {
            let out = PyList::empty(py);
            for fields in results {
                out.append(fields_to_py_dict(py, fields)?)?;
            }
            Ok(out.into_any().unbind())
        })
    })
}

/// Find documents and return typed document instances
///
/// Instances are constructed here, in native code, via the class's
/// validation-skipping path: the class is called without arguments and its
/// `_id`/`_data` attributes are assigned directly. Constructing per-element
/// in Python measures an order of magnitude slower on large result sets.
#[pyfunction]
#[pyo3(signature = (collection, document_class, filter=None, sort=None, skip=None, limit=None, timeout_ms=None))]
#[allow(clippy::too_many_arguments)]
fn find_as_documents<'py>(
    py: Python<'py>,
    collection: String,
    document_class: Bound<'py, PyAny>,
    filter: Option<&Bound<'_, PyDict>>,
    sort: Option<&Bound<'_, PyDict>>,
    skip: Option<u64>,
    limit: Option<i64>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let (filter_fields, sort_fields) = extract_find_inputs(py, filter, sort)?;
    let doc_class = document_class.unbind();
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        let spec = FindSpec {
            filter: fields_to_bson_document(filter_fields),
            sort: sort_fields.map(fields_to_bson_document),
            skip,
            limit,
        };
        let results = ops::find(&conn, &collection, spec, timeout)
            .await
            .map_err(bolt_to_pyerr)?;

        Python::with_gil(|py| {
            let class = doc_class.bind(py);
            let out = PyList::empty(py);
            for mut fields in results {
                // Decode puts _id first; it becomes the instance id rather
                // than part of the data dict
                let id_value = if fields.first().map(|(k, _)| k == "_id").unwrap_or(false) {
                    let (_, value) = fields.remove(0);
                    extracted_to_py(py, value)?
                } else {
                    py.None()
                };
                let data = fields_to_py_dict(py, fields)?;
                let instance = class.call0()?;
                instance.setattr("_id", id_value)?;
                instance.setattr("_data", data)?;
                out.append(instance)?;
            }
            Ok(out.into_any().unbind())
        })
    })
}

/// Update the first document matching the filter
///
/// Plain update dicts are wrapped in $set; operator documents are checked
/// against the operator allowlist. With required=True, zero matches raise.
///
/// Returns:
///     Number of documents modified
#[pyfunction]
#[pyo3(signature = (collection, filter, update, required=false, timeout_ms=None))]
fn update_one<'py>(
    py: Python<'py>,
    collection: String,
    filter: &Bound<'_, PyDict>,
    update: &Bound<'_, PyDict>,
    required: bool,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let filter_fields = extract_document(py, filter, &config)?;
    let update_fields = extract_document(py, update, &config)?;
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        ops::update_one(
            &conn,
            &collection,
            fields_to_bson_document(filter_fields),
            fields_to_bson_document(update_fields),
            required,
            timeout,
        )
        .await
        .map_err(bolt_to_pyerr)
    })
}

/// Update every document matching the filter
#[pyfunction]
#[pyo3(signature = (collection, filter, update, required=false, timeout_ms=None))]
fn update_many<'py>(
    py: Python<'py>,
    collection: String,
    filter: &Bound<'_, PyDict>,
    update: &Bound<'_, PyDict>,
    required: bool,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let filter_fields = extract_document(py, filter, &config)?;
    let update_fields = extract_document(py, update, &config)?;
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        ops::update_many(
            &conn,
            &collection,
            fields_to_bson_document(filter_fields),
            fields_to_bson_document(update_fields),
            required,
            timeout,
        )
        .await
        .map_err(bolt_to_pyerr)
    })
}

/// Push a tracker's change set as a minimal $set update
///
/// Args:
///     collection: target collection
///     id: document id (hex ObjectId string, or a custom string id)
///     changes: dict of changed field -> current value (tracker.get_changes)
///
/// An empty change set is a no-op returning 0 without a driver call.
#[pyfunction]
#[pyo3(signature = (collection, id, changes, timeout_ms=None))]
fn save_changes<'py>(
    py: Python<'py>,
    collection: String,
    id: String,
    changes: &Bound<'_, PyDict>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let change_fields = extract_document(py, changes, &config)?;
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        let id_value = ObjectId::parse_str(&id)
            .map(Bson::ObjectId)
            .unwrap_or(Bson::String(id));
        ops::save_changes(
            &conn,
            &collection,
            id_value,
            fields_to_bson_document(change_fields),
            timeout,
        )
        .await
        .map_err(bolt_to_pyerr)
    })
}

/// Delete the first document matching the filter
#[pyfunction]
#[pyo3(signature = (collection, filter, required=false, timeout_ms=None))]
fn delete_one<'py>(
    py: Python<'py>,
    collection: String,
    filter: &Bound<'_, PyDict>,
    required: bool,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let filter_fields = extract_document(py, filter, &config)?;
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        ops::delete_one(
            &conn,
            &collection,
            fields_to_bson_document(filter_fields),
            required,
            timeout,
        )
        .await
        .map_err(bolt_to_pyerr)
    })
}

/// Delete every document matching the filter
#[pyfunction]
#[pyo3(signature = (collection, filter, required=false, timeout_ms=None))]
fn delete_many<'py>(
    py: Python<'py>,
    collection: String,
    filter: &Bound<'_, PyDict>,
    required: bool,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let filter_fields = extract_document(py, filter, &config)?;
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        ops::delete_many(
            &conn,
            &collection,
            fields_to_bson_document(filter_fields),
            required,
            timeout,
        )
        .await
        .map_err(bolt_to_pyerr)
    })
}

/// Count documents matching the filter
#[pyfunction]
#[pyo3(signature = (collection, filter=None, timeout_ms=None))]
fn count<'py>(
    py: Python<'py>,
    collection: String,
    filter: Option<&Bound<'_, PyDict>>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();
    let filter_fields = match filter {
        Some(dict) => extract_document(py, dict, &config)?,
        None => Vec::new(),
    };
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        ops::count(&conn, &collection, fields_to_bson_document(filter_fields), timeout)
            .await
            .map_err(bolt_to_pyerr)
    })
}

/// Run an aggregation pipeline; every stage passes the sanitiser
///
/// Returns:
///     List of result documents as dicts
#[pyfunction]
#[pyo3(signature = (collection, pipeline, timeout_ms=None))]
fn aggregate<'py>(
    py: Python<'py>,
    collection: String,
    pipeline: &Bound<'_, PyList>,
    timeout_ms: Option<u64>,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();

    let mut stages: Vec<DocumentFields> = Vec::with_capacity(pipeline.len());
    for item in pipeline.iter() {
        let dict = item
            .downcast::<PyDict>()
            .map_err(|_| PyValueError::new_err("pipeline stages must be dicts"))?;
        stages.push(extract_document(py, dict, &config)?);
    }
    let timeout = timeout_from_ms(timeout_ms);

    future_into_py(py, async move {
        let bson_stages: Vec<BsonDocument> =
            stages.into_iter().map(fields_to_bson_document).collect();
        let results = ops::aggregate(&conn, &collection, bson_stages, timeout)
            .await
            .map_err(bolt_to_pyerr)?;

        Python::with_gil(|py| {
            let out = PyList::empty(py);
            for fields in results {
                out.append(fields_to_py_dict(py, fields)?)?;
            }
            Ok(out.into_any().unbind())
        })
    })
}

/// Resolve registered reference fields on a batch of documents
///
/// Per depth level, one $in query is issued per referenced collection, no
/// matter how many documents point into it. Returns the documents with the
/// resolved targets embedded in place of their ids.
#[pyfunction]
#[pyo3(signature = (collection, documents, depth=1))]
fn fetch_links<'py>(
    py: Python<'py>,
    collection: String,
    documents: &Bound<'_, PyList>,
    depth: usize,
) -> PyResult<Bound<'py, PyAny>> {
    let conn = get_connection()?;
    let config = get_config();

    let mut batch: Vec<DocumentFields> = Vec::with_capacity(documents.len());
    for item in documents.iter() {
        let dict = item
            .downcast::<PyDict>()
            .map_err(|_| PyValueError::new_err("all items must be dicts"))?;
        batch.push(extract_document(py, dict, &config)?);
    }

    future_into_py(py, async move {
        let mut docs: Vec<BsonDocument> =
            batch.into_iter().map(fields_to_bson_document).collect();
        links::fetch_links(&conn, &collection, &mut docs, depth)
            .await
            .map_err(bolt_to_pyerr)?;

        let threshold = conn.parallel_threshold();
        let decoded = mongobolt_mongodb::convert::decode_batch(docs, threshold);

        Python::with_gil(|py| {
            let out = PyList::empty(py);
            for fields in decoded {
                out.append(fields_to_py_dict(py, fields)?)?;
            }
            Ok(out.into_any().unbind())
        })
    })
}

/// Per-document change tracker backing minimal updates
///
/// Assignment hooks in the document class call track_change with the
/// pre-change value; save calls get_changes to build the $set payload and
/// reset afterwards. In-place mutation of nested containers is invisible to
/// the tracker; reassign the outer field instead.
#[pyclass]
pub struct StateTracker {
    inner: EngineStateTracker<Py<PyAny>>,
}

#[pymethods]
impl StateTracker {
    #[new]
    fn new() -> Self {
        StateTracker {
            inner: EngineStateTracker::new(),
        }
    }

    /// Record a field reassignment; only the first write stores a snapshot
    fn track_change(&mut self, name: &str, old_value: Py<PyAny>) {
        self.inner.track_change(name, old_value);
    }

    fn is_modified(&self) -> bool {
        self.inner.is_modified()
    }

    fn changed_fields(&self) -> Vec<String> {
        self.inner.changed_fields().map(str::to_string).collect()
    }

    /// Current values of the changed fields, looked up in `data`
    fn get_changes<'py>(
        &self,
        py: Python<'py>,
        data: &Bound<'py, PyDict>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let changes = PyDict::new(py);
        for name in self.inner.changed_fields() {
            if let Some(value) = data.get_item(name)? {
                changes.set_item(name, value)?;
            }
        }
        Ok(changes)
    }

    /// Restore every changed field in `data` to its pre-change value and
    /// clear the tracker
    fn rollback(&mut self, py: Python<'_>, data: &Bound<'_, PyDict>) -> PyResult<()> {
        let names: Vec<String> = self.inner.changed_fields().map(str::to_string).collect();
        for name in names {
            if let Some(original) = self.inner.original_value(&name) {
                data.set_item(&name, original.clone_ref(py))?;
            }
        }
        self.inner.reset();
        Ok(())
    }

    /// Forget all tracked changes. Called after a successful save.
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn __repr__(&self) -> String {
        format!(
            "StateTracker(changed_fields={:?})",
            self.changed_fields()
        )
    }
}

/// Register the mongodb module
pub fn register_module(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(init, m)?)?;
    m.add_function(wrap_pyfunction!(is_connected, m)?)?;
    m.add_function(wrap_pyfunction!(close, m)?)?;
    m.add_function(wrap_pyfunction!(reset, m)?)?;
    m.add_function(wrap_pyfunction!(ping, m)?)?;
    m.add_function(wrap_pyfunction!(register_schema, m)?)?;
    m.add_function(wrap_pyfunction!(register_links, m)?)?;
    m.add_function(wrap_pyfunction!(insert_one, m)?)?;
    m.add_function(wrap_pyfunction!(insert_many, m)?)?;
    m.add_function(wrap_pyfunction!(find_one, m)?)?;
    m.add_function(wrap_pyfunction!(find_as_dicts, m)?)?;
    m.add_function(wrap_pyfunction!(find_as_documents, m)?)?;
    m.add_function(wrap_pyfunction!(update_one, m)?)?;
    m.add_function(wrap_pyfunction!(update_many, m)?)?;
    m.add_function(wrap_pyfunction!(save_changes, m)?)?;
    m.add_function(wrap_pyfunction!(delete_one, m)?)?;
    m.add_function(wrap_pyfunction!(delete_many, m)?)?;
    m.add_function(wrap_pyfunction!(count, m)?)?;
    m.add_function(wrap_pyfunction!(aggregate, m)?)?;
    m.add_function(wrap_pyfunction!(fetch_links, m)?)?;
    m.add_class::<StateTracker>()?;

    m.add("__doc__", "MongoDB ODM operations with native BSON handling")?;

    Ok(())
}
