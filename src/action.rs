use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use link_protocol::{EditorType, Permission, ResultType, Response, Rid, StreamState, ValueType};
use serde_json::{Map, Number, Value, json};

use crate::error::BrokerError;

/// How the node dispatches the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvokeMode {
    /// Run inline on the caller's task.
    Sync,
    /// Hand off to the runtime and return immediately.
    #[default]
    Async,
}

/// Does the work of an action once its parameters are resolved.
pub trait ActionHandler: Send + Sync {
    fn handle(&self, result: &mut ActionResult, params: &Map<String, Value>) -> Result<(), BrokerError>;
}

impl<F> ActionHandler for F
where
    F: Fn(&mut ActionResult, &Map<String, Value>) -> Result<(), BrokerError> + Send + Sync,
{
    fn handle(&self, result: &mut ActionResult, params: &Map<String, Value>) -> Result<(), BrokerError> {
        self(result, params)
    }
}

/// Checks a raw parameter value and returns the value to use instead.
pub trait Validator: Send + Sync {
    fn validate(&self, value: Value) -> Result<Value, BrokerError>;
}

impl<F> Validator for F
where
    F: Fn(Value) -> Result<Value, BrokerError> + Send + Sync,
{
    fn validate(&self, value: Value) -> Result<Value, BrokerError> {
        self(value)
    }
}

/// Remembers persistent parameter values per node.
pub trait ParameterStore: Send + Sync {
    fn load(&self, node: &str, name: &str) -> Option<Value>;
    fn store(&self, node: &str, name: &str, value: Value);
}

#[derive(Debug, Default)]
pub struct MapParameterStore {
    values: DashMap<(String, String), Value>,
}

impl MapParameterStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ParameterStore for MapParameterStore {
    fn load(&self, node: &str, name: &str) -> Option<Value> {
        self.values
            .get(&(node.to_string(), name.to_string()))
            .map(|v| v.clone())
    }

    fn store(&self, node: &str, name: &str, value: Value) {
        self.values.insert((node.to_string(), name.to_string()), value);
    }
}

/// Declared input parameter or result column.
#[derive(Clone)]
pub struct Parameter {
    name: String,
    value_type: ValueType,
    default: Option<Value>,
    editor: Option<EditorType>,
    description: Option<String>,
    placeholder: Option<String>,
    optional: bool,
    persistent: bool,
    validator: Option<Arc<dyn Validator>>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            default: None,
            editor: None,
            description: None,
            placeholder: None,
            optional: false,
            persistent: false,
            validator: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_editor(mut self, editor: EditorType) -> Self {
        self.editor = Some(editor);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = Some(placeholder.into());
        self
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), json!(self.name));
        obj.insert("type".into(), json!(self.value_type.to_string()));
        if let Some(default) = &self.default {
            obj.insert("default".into(), default.clone());
        }
        if let Some(editor) = self.editor {
            obj.insert("editor".into(), json!(editor.as_ref()));
        }
        if let Some(description) = &self.description {
            obj.insert("description".into(), json!(description));
        }
        if let Some(placeholder) = &self.placeholder {
            obj.insert("placeholder".into(), json!(placeholder));
        }
        Value::Object(obj)
    }

    fn coerce(&self, value: Value) -> Result<Value, BrokerError> {
        let invalid = |reason: String| BrokerError::InvalidParameter {
            name: self.name.clone(),
            reason,
        };
        match (&self.value_type, value) {
            (ValueType::Dynamic, v) => Ok(v),
            (ValueType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ValueType::Bool, Value::String(s)) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(invalid(format!("`{s}` is not a bool"))),
            },
            (ValueType::Number, Value::Number(n)) => Ok(Value::Number(n)),
            (ValueType::Number, Value::String(s)) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    Ok(Value::Number(i.into()))
                } else {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .and_then(Number::from_f64)
                        .map(Value::Number)
                        .ok_or_else(|| invalid(format!("`{s}` is not a number")))
                }
            }
            (ValueType::String | ValueType::Time, Value::String(s)) => Ok(Value::String(s)),
            (ValueType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (ValueType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (ValueType::Map, Value::Object(o)) => Ok(Value::Object(o)),
            (ValueType::Array, Value::Array(a)) => Ok(Value::Array(a)),
            (ValueType::Enum(allowed), Value::String(s)) => {
                if allowed.iter().any(|a| a == &s) {
                    Ok(Value::String(s))
                } else {
                    Err(invalid(format!("`{s}` is not one of {}", allowed.join(", "))))
                }
            }
            (expected, other) => Err(invalid(format!("expected {expected}, got {other}"))),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("default", &self.default)
            .field("optional", &self.optional)
            .field("persistent", &self.persistent)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Everything an invocation produces: rows, optional column override and
/// the final stream state.
#[derive(Debug, Clone)]
pub struct ActionResult {
    node: String,
    params: Map<String, Value>,
    columns: Option<Vec<Value>>,
    rows: Vec<Value>,
    stream: StreamState,
}

impl ActionResult {
    pub fn new(node: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            node: node.into(),
            params,
            columns: None,
            rows: Vec::new(),
            stream: StreamState::Closed,
        }
    }

    /// Path of the node being invoked.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Parameters exactly as the requester sent them.
    pub fn raw_params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn add_row(&mut self, row: Vec<Value>) {
        self.rows.push(Value::Array(row));
    }

    pub fn rows(&self) -> &[Value] {
        &self.rows
    }

    pub fn set_columns(&mut self, columns: Vec<Value>) {
        self.columns = Some(columns);
    }

    pub fn set_stream_state(&mut self, stream: StreamState) {
        self.stream = stream;
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream
    }

    pub fn into_response(self, rid: Rid, declared_columns: Vec<Value>) -> Response {
        let columns = self.columns.unwrap_or(declared_columns);
        let mut response = Response::new(rid, Some(self.stream)).with_updates(self.rows);
        if !columns.is_empty() {
            response = response.with_columns(columns);
        }
        response
    }
}

/// An invokable operation attached to a node.
pub struct Action {
    permission: Permission,
    result_type: ResultType,
    hidden: bool,
    mode: InvokeMode,
    params: Vec<Parameter>,
    results: Vec<Parameter>,
    handler: Arc<dyn ActionHandler>,
    store: Option<Arc<dyn ParameterStore>>,
}

impl Action {
    /// Defaults to [`InvokeMode::Async`] and [`ResultType::Values`].
    pub fn new(permission: Permission, handler: impl ActionHandler + 'static) -> Self {
        Self {
            permission,
            result_type: ResultType::Values,
            hidden: false,
            mode: InvokeMode::default(),
            params: Vec::new(),
            results: Vec::new(),
            handler: Arc::new(handler),
            store: None,
        }
    }

    pub fn with_mode(mut self, mode: InvokeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ParameterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Hidden actions are not advertised in listings.
    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    pub fn set_permission(&mut self, permission: Permission) {
        self.permission = permission;
    }

    pub fn add_parameter(mut self, parameter: Parameter) -> Self {
        self.params.push(parameter);
        self
    }

    /// Result columns describe output only, so defaults and editors are refused.
    pub fn add_result(mut self, parameter: Parameter) -> Result<Self, BrokerError> {
        if parameter.default.is_some() {
            return Err(BrokerError::ActionMisconfigured(format!(
                "result `{}` cannot contain a default value",
                parameter.name
            )));
        }
        if parameter.editor.is_some() {
            return Err(BrokerError::ActionMisconfigured(format!(
                "result `{}` cannot contain an editor type",
                parameter.name
            )));
        }
        self.results.push(parameter);
        Ok(self)
    }

    pub fn invoke_mode(&self) -> InvokeMode {
        self.mode
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn has_permission(&self) -> bool {
        self.permission != Permission::None
    }

    pub fn permission(&self) -> Permission {
        self.permission
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    pub fn params_json(&self) -> Vec<Value> {
        self.params.iter().map(Parameter::to_json).collect()
    }

    pub fn columns_json(&self) -> Vec<Value> {
        self.results.iter().map(Parameter::to_json).collect()
    }

    /// Runs the handler. Without permission this does nothing at all.
    pub fn invoke(&self, result: &mut ActionResult) -> Result<(), BrokerError> {
        if !self.has_permission() {
            return Ok(());
        }
        let params = self.resolve_params(result)?;
        self.handler.handle(result, &params)
    }

    fn resolve_params(&self, result: &ActionResult) -> Result<Map<String, Value>, BrokerError> {
        let mut resolved = Map::new();
        for param in &self.params {
            let supplied = result
                .raw_params()
                .get(&param.name)
                .filter(|v| !v.is_null())
                .cloned();
            let from_request = supplied.is_some();
            let raw = supplied
                .or_else(|| {
                    if param.persistent {
                        self.store
                            .as_ref()
                            .and_then(|s| s.load(result.node(), &param.name))
                    } else {
                        None
                    }
                })
                .or_else(|| param.default.clone());

            let Some(raw) = raw else {
                if param.optional {
                    continue;
                }
                return Err(BrokerError::MissingParameter(param.name.clone()));
            };

            let mut value = param.coerce(raw)?;
            if let Some(validator) = &param.validator {
                value = validator.validate(value)?;
            }
            if param.persistent && from_request {
                if let Some(store) = &self.store {
                    store.store(result.node(), &param.name, value.clone());
                }
            }
            resolved.insert(param.name.clone(), value);
        }
        Ok(resolved)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("permission", &self.permission)
            .field("result_type", &self.result_type)
            .field("hidden", &self.hidden)
            .field("mode", &self.mode)
            .field("params", &self.params)
            .field("results", &self.results)
            .finish()
    }
}
