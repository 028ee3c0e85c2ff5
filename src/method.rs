use super::app;
use super::message;
use super::session;
use json::JsonValue;
use std::fmt;

pub type MethodHandler = fn(
    &mut Box<dyn app::ApplicationWorker>,
    &mut session::ServerSession,
    &message::Method,
) -> Result<(), String>;

#[derive(Debug, Copy, Clone)]
pub enum ParamCount {
    Any,
    Zero,
    Exactly(u8),
    AtLeast(u8),
    Range(u8, u8), // Inclusive
}

impl ParamCount {
    /// Returns true if the number of params provided matches the
    /// number specified by the ParamCount enum.
    ///
    /// ```
    /// use opensrf::method::ParamCount;
    /// assert!(ParamCount::matches(&ParamCount::Any, 0));
    /// assert!(!ParamCount::matches(&ParamCount::Exactly(1), 10));
    /// assert!(ParamCount::matches(&ParamCount::AtLeast(10), 20));
    /// assert!(!ParamCount::matches(&ParamCount::AtLeast(20), 10));
    /// assert!(ParamCount::matches(&ParamCount::Range(4, 6), 5));
    /// ```
    pub fn matches(pc: &ParamCount, count: u8) -> bool {
        match *pc {
            ParamCount::Any => {
                return true;
            }
            ParamCount::Zero => {
                return count == 0;
            }
            ParamCount::Exactly(c) => {
                return count == c;
            }
            ParamCount::AtLeast(c) => {
                return count >= c;
            }
            ParamCount::Range(s, e) => {
                return s <= count && e >= count;
            }
        }
    }
}

impl fmt::Display for ParamCount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParamCount::Any => write!(f, "Any"),
            ParamCount::Zero => write!(f, "Zero"),
            ParamCount::Exactly(c) => write!(f, "Exactly {}", c),
            ParamCount::AtLeast(c) => write!(f, "AtLeast {}", c),
            ParamCount::Range(s, e) => write!(f, "Between {}..{}", s, e),
        }
    }
}

/// Crude type hint for a single named parameter, used only for
/// self-description via opensrf.system.method.all.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ParamDataType {
    String,
    Number,
    Bool,
    Array,
    Object,
    Mixed,
}

impl fmt::Display for ParamDataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            ParamDataType::String => "string",
            ParamDataType::Number => "number",
            ParamDataType::Bool => "bool",
            ParamDataType::Array => "array",
            ParamDataType::Object => "object",
            ParamDataType::Mixed => "mixed",
        };
        write!(f, "{s}")
    }
}

/// Describes one named parameter for introspection purposes.
#[derive(Debug, Clone)]
pub struct Param {
    pub required: bool,
    pub name: String,
    pub datatype: ParamDataType,
    pub desc: Option<String>,
}

impl Param {
    fn to_json_value(&self) -> JsonValue {
        json::object! {
            "required": self.required,
            "name": self.name.as_str(),
            "datatype": self.datatype.to_string(),
            "desc": match self.desc.as_ref() {
                Some(d) => json::from(d.as_str()),
                None => JsonValue::Null,
            },
        }
    }
}

/// A variation of a Method that can be used when creating static
/// method definitions.
pub struct MethodDef {
    pub name: &'static str,
    pub param_count: ParamCount,
    pub handler: MethodHandler,
}

impl MethodDef {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn param_count(&self) -> &ParamCount {
        &self.param_count
    }
    pub fn handler(&self) -> &MethodHandler {
        &self.handler
    }
}

/// A published, self-describing API method.
#[derive(Clone)]
pub struct Method {
    name: String,
    param_count: ParamCount,
    handler: MethodHandler,
    desc: Option<String>,
    atomic: bool,
    params: Vec<Param>,
}

impl Method {
    pub fn new(name: &str, param_count: ParamCount, handler: MethodHandler) -> Method {
        Method {
            handler,
            param_count,
            name: name.to_string(),
            desc: None,
            atomic: false,
            params: Vec::new(),
        }
    }

    pub fn param_count(&self) -> &ParamCount {
        &self.param_count
    }

    pub fn handler(&self) -> MethodHandler {
        self.handler
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn desc(&self) -> Option<&str> {
        self.desc.as_deref()
    }

    pub fn set_desc(&mut self, desc: &str) {
        self.desc = Some(desc.to_string());
    }

    pub fn atomic(&self) -> bool {
        self.atomic
    }

    pub fn set_atomic(&mut self, atomic: bool) {
        self.atomic = atomic;
    }

    pub fn params(&self) -> &Vec<Param> {
        &self.params
    }

    pub fn add_param(&mut self, param: Param) {
        self.params.push(param);
    }

    /// Serializes this method's public description for use by
    /// opensrf.system.method.all.
    pub fn to_json_value(&self) -> JsonValue {
        json::object! {
            "api_name": self.name.as_str(),
            "argc": match self.param_count {
                ParamCount::Any => 0,
                ParamCount::Zero => 0,
                ParamCount::Exactly(c) => c,
                ParamCount::AtLeast(c) => c,
                ParamCount::Range(s, _) => s,
            },
            "atomic": self.atomic,
            "desc": match self.desc.as_ref() {
                Some(d) => json::from(d.as_str()),
                None => JsonValue::Null,
            },
            "params": self.params.iter().map(|p| p.to_json_value()).collect::<Vec<JsonValue>>(),
        }
    }
}
