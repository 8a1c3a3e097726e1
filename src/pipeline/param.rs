//! Live-tunable item parameters.
//!
//! Two flavours exist, mirroring how they are presented to the user:
//!
//! - **Trims** are slider-backed floating point values that are tuned while
//!   the item runs. They never restart the item.
//! - **Configs** are typed settings (integer, float, bool, text, choice,
//!   file path) edited in a configuration dialog. A config created with
//!   `restart_when_changed` restarts its item once per distinct change.
//!
//! Every parameter lives in a [`ParamCell`] behind an `RwLock`, so the item
//! thread always reads a whole value even while the control surface writes.

use crate::pipeline::error::{PipelineError, PipelineResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Current value of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Choice(usize),
    Path(PathBuf),
}

impl ParamValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// What kind of file-system entry a path parameter selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilePathMode {
    OpenFile,
    SaveFile,
    Directory,
}

/// Validates (and may normalise in place) a text parameter.
pub type TextChecker = Arc<dyn Fn(&mut String) -> bool + Send + Sync>;

/// Called with the new value whenever a trim changes.
pub type TrimNotifier = Arc<dyn Fn(f64) + Send + Sync>;

type RestartHook = Box<dyn Fn() + Send + Sync>;

/// Value-domain constraints of a parameter.
#[derive(Clone)]
pub enum ParamDomain {
    Trim {
        min: f64,
        max: f64,
        steps: u32,
        logarithmic: bool,
    },
    Int {
        min: i64,
        max: i64,
    },
    Float {
        min: f64,
        max: f64,
    },
    Bool,
    Text {
        checker: Option<TextChecker>,
    },
    Choice {
        options: Vec<String>,
    },
    Path {
        mode: FilePathMode,
        filter: String,
    },
}

impl ParamDomain {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamDomain::Trim { .. } => ParamKind::Trim,
            ParamDomain::Int { .. } => ParamKind::Int,
            ParamDomain::Float { .. } => ParamKind::Float,
            ParamDomain::Bool => ParamKind::Bool,
            ParamDomain::Text { .. } => ParamKind::Text,
            ParamDomain::Choice { .. } => ParamKind::Choice,
            ParamDomain::Path { .. } => ParamKind::Path,
        }
    }

    /// Make numeric bounds usable for clamping: NaN bounds become open ends
    /// and reversed bounds are swapped.
    fn sanitized(self, name: &str) -> Self {
        match self {
            ParamDomain::Trim {
                min,
                max,
                steps,
                logarithmic,
            } => {
                let (min, max) = float_bounds(name, min, max);
                ParamDomain::Trim {
                    min,
                    max,
                    steps,
                    logarithmic,
                }
            }
            ParamDomain::Float { min, max } => {
                let (min, max) = float_bounds(name, min, max);
                ParamDomain::Float { min, max }
            }
            ParamDomain::Int { min, max } if min > max => {
                tracing::warn!(param = %name, min, max, "reversed bounds, swapping");
                ParamDomain::Int { min: max, max: min }
            }
            other => other,
        }
    }
}

fn float_bounds(name: &str, min: f64, max: f64) -> (f64, f64) {
    let min = if min.is_nan() {
        tracing::warn!(param = %name, "NaN lower bound, leaving it open");
        f64::NEG_INFINITY
    } else {
        min
    };
    let max = if max.is_nan() {
        tracing::warn!(param = %name, "NaN upper bound, leaving it open");
        f64::INFINITY
    } else {
        max
    };
    if min > max {
        tracing::warn!(param = %name, min, max, "reversed bounds, swapping");
        (max, min)
    } else {
        (min, max)
    }
}

impl fmt::Debug for ParamDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamDomain::Trim {
                min,
                max,
                steps,
                logarithmic,
            } => f
                .debug_struct("Trim")
                .field("min", min)
                .field("max", max)
                .field("steps", steps)
                .field("logarithmic", logarithmic)
                .finish(),
            ParamDomain::Int { min, max } => {
                f.debug_struct("Int").field("min", min).field("max", max).finish()
            }
            ParamDomain::Float { min, max } => {
                f.debug_struct("Float").field("min", min).field("max", max).finish()
            }
            ParamDomain::Bool => f.write_str("Bool"),
            ParamDomain::Text { checker } => f
                .debug_struct("Text")
                .field("checked", &checker.is_some())
                .finish(),
            ParamDomain::Choice { options } => {
                f.debug_struct("Choice").field("options", options).finish()
            }
            ParamDomain::Path { mode, filter } => f
                .debug_struct("Path")
                .field("mode", mode)
                .field("filter", filter)
                .finish(),
        }
    }
}

/// Type tag of a parameter for the host's editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    Trim,
    Int,
    Float,
    Bool,
    Text,
    Choice,
    Path,
}

/// Snapshot of one parameter for display/editing by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamDescriptor {
    pub name: String,
    pub kind: ParamKind,
    pub value: ParamValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    pub logarithmic: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_mode: Option<FilePathMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub restart_when_changed: bool,
}

/// Storage of a single parameter.
pub struct ParamCell {
    name: String,
    domain: ParamDomain,
    value: RwLock<ParamValue>,
    restart_when_changed: bool,
    notifier: Option<TrimNotifier>,
    restart: Arc<OnceLock<RestartHook>>,
}

impl ParamCell {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &ParamDomain {
        &self.domain
    }

    pub fn value(&self) -> ParamValue {
        self.value.read().clone()
    }

    fn invalid(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::InvalidParam {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Bring `value` into this parameter's domain, or reject it.
    fn validate(&self, value: ParamValue) -> PipelineResult<ParamValue> {
        match (&self.domain, value) {
            (ParamDomain::Trim { min, max, .. }, v) | (ParamDomain::Float { min, max }, v) => {
                let x = v
                    .as_float()
                    .ok_or_else(|| self.invalid("expected a number"))?;
                if x.is_nan() {
                    return Err(self.invalid("value is NaN"));
                }
                Ok(ParamValue::Float(x.clamp(*min, *max)))
            }
            (ParamDomain::Int { min, max }, ParamValue::Int(x)) => {
                Ok(ParamValue::Int(x.clamp(*min, *max)))
            }
            (ParamDomain::Bool, ParamValue::Bool(b)) => Ok(ParamValue::Bool(b)),
            (ParamDomain::Text { checker }, ParamValue::Text(mut s)) => {
                if let Some(check) = checker {
                    if !check(&mut s) {
                        return Err(self.invalid(format!("'{}' rejected by checker", s)));
                    }
                }
                Ok(ParamValue::Text(s))
            }
            (ParamDomain::Choice { options }, ParamValue::Choice(i)) => {
                if i < options.len() {
                    Ok(ParamValue::Choice(i))
                } else {
                    Err(self.invalid(format!(
                        "choice {} out of range ({} options)",
                        i,
                        options.len()
                    )))
                }
            }
            (ParamDomain::Choice { options }, ParamValue::Text(label)) => options
                .iter()
                .position(|o| *o == label)
                .map(ParamValue::Choice)
                .ok_or_else(|| self.invalid(format!("'{}' is not one of the options", label))),
            (ParamDomain::Path { .. }, ParamValue::Path(p)) => Ok(ParamValue::Path(p)),
            (ParamDomain::Path { .. }, ParamValue::Text(s)) => Ok(ParamValue::Path(s.into())),
            (domain, other) => Err(self.invalid(format!(
                "{:?} does not fit a {:?} parameter",
                other,
                domain.kind()
            ))),
        }
    }

    /// Validate and store `value`. Returns whether the stored value changed.
    pub fn set(&self, value: ParamValue) -> PipelineResult<bool> {
        let value = self.validate(value)?;
        {
            let mut current = self.value.write();
            if *current == value {
                return Ok(false);
            }
            *current = value.clone();
        }

        tracing::debug!(param = %self.name, value = ?value, "parameter changed");

        if let (Some(notify), Some(x)) = (&self.notifier, value.as_float()) {
            notify(x);
        }
        if self.restart_when_changed {
            if let Some(restart) = self.restart.get() {
                restart();
            }
        }
        Ok(true)
    }

    pub fn descriptor(&self) -> ParamDescriptor {
        let mut desc = ParamDescriptor {
            name: self.name.clone(),
            kind: self.domain.kind(),
            value: self.value(),
            min: None,
            max: None,
            steps: None,
            logarithmic: false,
            options: Vec::new(),
            path_mode: None,
            filter: None,
            restart_when_changed: self.restart_when_changed,
        };
        match &self.domain {
            ParamDomain::Trim {
                min,
                max,
                steps,
                logarithmic,
            } => {
                desc.min = Some(*min);
                desc.max = Some(*max);
                desc.steps = Some(*steps);
                desc.logarithmic = *logarithmic;
            }
            ParamDomain::Int { min, max } => {
                desc.min = Some(*min as f64);
                desc.max = Some(*max as f64);
            }
            ParamDomain::Float { min, max } => {
                desc.min = Some(*min);
                desc.max = Some(*max);
            }
            ParamDomain::Choice { options } => desc.options = options.clone(),
            ParamDomain::Path { mode, filter } => {
                desc.path_mode = Some(*mode);
                desc.filter = Some(filter.clone());
            }
            ParamDomain::Bool | ParamDomain::Text { .. } => {}
        }
        desc
    }
}

/// Index into a choice config's option list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChoiceIndex(pub usize);

/// Rust types a [`Config`] can hold.
pub trait ConfigType: Sized + Default {
    fn from_value(value: &ParamValue) -> Option<Self>;
    fn into_value(self) -> ParamValue;
}

impl ConfigType for i64 {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_int()
    }
    fn into_value(self) -> ParamValue {
        ParamValue::Int(self)
    }
}

impl ConfigType for f64 {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_float()
    }
    fn into_value(self) -> ParamValue {
        ParamValue::Float(self)
    }
}

impl ConfigType for bool {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_bool()
    }
    fn into_value(self) -> ParamValue {
        ParamValue::Bool(self)
    }
}

impl ConfigType for String {
    fn from_value(value: &ParamValue) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
    fn into_value(self) -> ParamValue {
        ParamValue::Text(self)
    }
}

impl ConfigType for ChoiceIndex {
    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Choice(i) => Some(ChoiceIndex(*i)),
            _ => None,
        }
    }
    fn into_value(self) -> ParamValue {
        ParamValue::Choice(self.0)
    }
}

impl ConfigType for PathBuf {
    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Path(p) => Some(p.clone()),
            _ => None,
        }
    }
    fn into_value(self) -> ParamValue {
        ParamValue::Path(self)
    }
}

/// Slider-backed live parameter.
#[derive(Clone)]
pub struct Trim {
    cell: Arc<ParamCell>,
}

impl Trim {
    pub fn name(&self) -> &str {
        self.cell.name()
    }

    /// Current value, read atomically with respect to concurrent writers.
    pub fn value(&self) -> f64 {
        self.cell.value().as_float().unwrap_or_default()
    }

    pub fn set_value(&self, value: f64) -> PipelineResult<bool> {
        self.cell.set(ParamValue::Float(value))
    }

    /// Move the slider to `position` in `0..=steps`.
    pub fn set_position(&self, position: u32) -> PipelineResult<bool> {
        self.cell.set(ParamValue::Float(self.position_to_value(position)))
    }

    /// Slider position closest to the current value.
    pub fn position(&self) -> u32 {
        self.value_to_position(self.value())
    }

    fn position_to_value(&self, position: u32) -> f64 {
        let ParamDomain::Trim {
            min,
            max,
            steps,
            logarithmic,
        } = self.cell.domain
        else {
            return 0.0;
        };
        if steps == 0 {
            return min;
        }
        let t = f64::from(position.min(steps)) / f64::from(steps);
        if logarithmic && min > 0.0 {
            min * (max / min).powf(t)
        } else {
            min + t * (max - min)
        }
    }

    fn value_to_position(&self, value: f64) -> u32 {
        let ParamDomain::Trim {
            min,
            max,
            steps,
            logarithmic,
        } = self.cell.domain
        else {
            return 0;
        };
        if steps == 0 || max <= min {
            return 0;
        }
        let t = if logarithmic && min > 0.0 {
            (value / min).ln() / (max / min).ln()
        } else {
            (value - min) / (max - min)
        };
        (t.clamp(0.0, 1.0) * f64::from(steps)).round() as u32
    }
}

impl fmt::Debug for Trim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trim")
            .field("name", &self.cell.name)
            .field("value", &self.value())
            .finish()
    }
}

/// Typed configuration parameter.
pub struct Config<T> {
    cell: Arc<ParamCell>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: ConfigType> Config<T> {
    pub fn name(&self) -> &str {
        self.cell.name()
    }

    /// Current value, read atomically with respect to concurrent writers.
    pub fn get(&self) -> T {
        T::from_value(&self.cell.value.read()).unwrap_or_default()
    }

    pub fn set(&self, value: T) -> PipelineResult<bool> {
        self.cell.set(value.into_value())
    }
}

impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("name", &self.cell.name)
            .field("value", &*self.cell.value.read())
            .finish()
    }
}

/// All parameters of one item, in declaration order.
#[derive(Default)]
pub struct ParamStore {
    cells: Vec<Arc<ParamCell>>,
    restart: Arc<OnceLock<RestartHook>>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &mut self,
        name: &str,
        domain: ParamDomain,
        default: ParamValue,
        restart_when_changed: bool,
        notifier: Option<TrimNotifier>,
    ) -> Arc<ParamCell> {
        if self.cell(name).is_some() {
            tracing::warn!(param = %name, "duplicate parameter name; lookups resolve to the first");
        }

        let mut cell = ParamCell {
            name: name.to_owned(),
            domain: domain.sanitized(name),
            value: RwLock::new(default.clone()),
            restart_when_changed,
            notifier,
            restart: Arc::clone(&self.restart),
        };
        match cell.validate(default) {
            Ok(v) => *cell.value.get_mut() = v,
            Err(e) => tracing::warn!(param = %name, "invalid default kept as-is: {}", e),
        }

        let cell = Arc::new(cell);
        self.cells.push(Arc::clone(&cell));
        cell
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_trim(
        &mut self,
        name: &str,
        default: f64,
        min: f64,
        max: f64,
        steps: u32,
        logarithmic: bool,
        notifier: Option<TrimNotifier>,
    ) -> Trim {
        let domain = ParamDomain::Trim {
            min,
            max,
            steps,
            logarithmic,
        };
        Trim {
            cell: self.insert(name, domain, ParamValue::Float(default), false, notifier),
        }
    }

    pub fn add_int(
        &mut self,
        name: &str,
        default: i64,
        min: i64,
        max: i64,
        restart_when_changed: bool,
    ) -> Config<i64> {
        self.typed(
            name,
            ParamDomain::Int { min, max },
            default,
            restart_when_changed,
        )
    }

    pub fn add_float(
        &mut self,
        name: &str,
        default: f64,
        min: f64,
        max: f64,
        restart_when_changed: bool,
    ) -> Config<f64> {
        self.typed(
            name,
            ParamDomain::Float { min, max },
            default,
            restart_when_changed,
        )
    }

    pub fn add_bool(&mut self, name: &str, default: bool, restart_when_changed: bool) -> Config<bool> {
        self.typed(name, ParamDomain::Bool, default, restart_when_changed)
    }

    pub fn add_text(
        &mut self,
        name: &str,
        default: &str,
        checker: Option<TextChecker>,
        restart_when_changed: bool,
    ) -> Config<String> {
        self.typed(
            name,
            ParamDomain::Text { checker },
            default.to_owned(),
            restart_when_changed,
        )
    }

    pub fn add_choice(
        &mut self,
        name: &str,
        default_index: usize,
        options: &[&str],
        restart_when_changed: bool,
    ) -> Config<ChoiceIndex> {
        let options = options.iter().map(|o| (*o).to_owned()).collect();
        self.typed(
            name,
            ParamDomain::Choice { options },
            ChoiceIndex(default_index),
            restart_when_changed,
        )
    }

    pub fn add_path(
        &mut self,
        name: &str,
        default: impl Into<PathBuf>,
        mode: FilePathMode,
        filter: &str,
        restart_when_changed: bool,
    ) -> Config<PathBuf> {
        self.typed(
            name,
            ParamDomain::Path {
                mode,
                filter: filter.to_owned(),
            },
            default.into(),
            restart_when_changed,
        )
    }

    fn typed<T: ConfigType>(
        &mut self,
        name: &str,
        domain: ParamDomain,
        default: T,
        restart_when_changed: bool,
    ) -> Config<T> {
        Config {
            cell: self.insert(name, domain, default.into_value(), restart_when_changed, None),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn cell(&self, name: &str) -> Option<&Arc<ParamCell>> {
        self.cells.iter().find(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.cell(name).map(|c| c.value())
    }

    /// Control-surface write. Returns whether the stored value changed.
    pub fn set(&self, name: &str, value: ParamValue) -> PipelineResult<bool> {
        self.cell(name)
            .ok_or_else(|| PipelineError::UnknownParam(name.to_owned()))?
            .set(value)
    }

    pub fn descriptors(&self) -> Vec<ParamDescriptor> {
        self.cells.iter().map(|c| c.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether any non-trim parameter exists (the item is configurable).
    pub fn has_config(&self) -> bool {
        self.cells
            .iter()
            .any(|c| c.domain.kind() != ParamKind::Trim)
    }

    /// Install the callback run by restart-triggering parameters.
    /// Only the first installation takes effect.
    pub(crate) fn install_restart_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        if self.restart.set(Box::new(hook)).is_err() {
            tracing::warn!("restart hook already installed");
        }
    }
}

impl fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.cells.iter().map(|c| c.name()))
            .finish()
    }
}
