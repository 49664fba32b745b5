//! Decorator processor
//!
//! Turns the decorator applications on a compiled function into structured
//! specs. The set of decorators is closed: each kind has a fixed schema for
//! positional arity and accepted keywords. A malformed application is logged
//! and dropped on its own; the function and its other decorators still count.

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::EngineConfig;
use crate::error::DecoratorError;
use crate::function::{CompiledFunction, DecoratorCall};
use crate::spec::{
    ActiveGuardSpec, EventTriggerSpec, ServiceSpec, StateTriggerSpec, TimeTriggerSpec,
    TriggerSpec, UniquePolicy, UniqueSpec,
};

#[derive(Debug, Clone, Copy)]
enum Arity {
    None,
    Exactly1,
    OneOrTwo,
    AtLeast1,
    Any,
}

#[derive(Debug, Clone, Copy)]
enum KeywordType {
    String,
    Bool,
}

impl KeywordType {
    fn name(self) -> &'static str {
        match self {
            KeywordType::String => "string",
            KeywordType::Bool => "bool",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            KeywordType::String => value.is_string(),
            KeywordType::Bool => value.is_boolean(),
        }
    }
}

struct Schema {
    name: &'static str,
    arity: Arity,
    /// `None` means positional-only
    keywords: Option<&'static [(&'static str, KeywordType)]>,
}

const SCHEMAS: &[Schema] = &[
    Schema {
        name: "service",
        arity: Arity::None,
        keywords: None,
    },
    Schema {
        name: "state_trigger",
        arity: Arity::AtLeast1,
        keywords: Some(&[("from", KeywordType::String), ("to", KeywordType::String)]),
    },
    Schema {
        name: "time_trigger",
        arity: Arity::Any,
        keywords: None,
    },
    Schema {
        name: "event_trigger",
        arity: Arity::OneOrTwo,
        keywords: None,
    },
    Schema {
        name: "state_active",
        arity: Arity::Exactly1,
        keywords: None,
    },
    Schema {
        name: "task_unique",
        arity: Arity::Exactly1,
        keywords: Some(&[("kill_me", KeywordType::Bool)]),
    },
    Schema {
        name: "task_queue",
        arity: Arity::Exactly1,
        keywords: None,
    },
];

/// A validated decorator application
#[derive(Debug, Clone, PartialEq)]
pub enum Decorator {
    Service,
    Trigger(TriggerSpec),
    StateActive(ActiveGuardSpec),
    Unique(UniqueSpec),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecorator {
    pub decorator: Decorator,
    /// Keywords outside the schema, dropped individually
    pub ignored_keywords: Vec<String>,
    pub valid_keywords: Vec<&'static str>,
}

/// Validate one application against its schema
pub fn parse(call: &DecoratorCall) -> Result<ParsedDecorator, DecoratorError> {
    let schema = SCHEMAS
        .iter()
        .find(|s| s.name == call.name)
        .ok_or(DecoratorError::Unknown)?;

    let got = call.args.len();
    match schema.arity {
        Arity::None if got > 0 => return Err(DecoratorError::TakesNoArguments),
        Arity::Exactly1 if got != 1 => {
            return Err(DecoratorError::WrongArgCount { got, expected: "1" })
        }
        Arity::OneOrTwo if !(1..=2).contains(&got) => {
            return Err(DecoratorError::WrongArgCount {
                got,
                expected: "1 or 2",
            })
        }
        Arity::AtLeast1 if got == 0 => {
            return Err(DecoratorError::WrongArgCount {
                got,
                expected: "at least 1",
            })
        }
        _ => {}
    }

    let mut args = Vec::with_capacity(got);
    for (i, arg) in call.args.iter().enumerate() {
        match arg.as_str() {
            Some(s) => args.push(s.to_string()),
            None => return Err(DecoratorError::NotAString { position: i + 1 }),
        }
    }

    let mut ignored_keywords = Vec::new();
    let mut valid_keywords = Vec::new();
    match schema.keywords {
        None if !call.kwargs.is_empty() => return Err(DecoratorError::NoKeywords),
        None => {}
        Some(allowed) => {
            valid_keywords = allowed.iter().map(|(name, _)| *name).collect();
            for (name, value) in &call.kwargs {
                match allowed.iter().find(|(n, _)| n == name) {
                    Some((_, ty)) if !ty.accepts(value) => {
                        return Err(DecoratorError::KeywordType {
                            name: name.clone(),
                            expected: ty.name(),
                        })
                    }
                    Some(_) => {}
                    None => ignored_keywords.push(name.clone()),
                }
            }
        }
    }

    let kwarg_str = |name: &str| {
        call.kwargs
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let decorator = match schema.name {
        "service" => Decorator::Service,
        "state_trigger" => Decorator::Trigger(TriggerSpec::State(StateTriggerSpec {
            exprs: args,
            from: kwarg_str("from"),
            to: kwarg_str("to"),
        })),
        "time_trigger" => {
            let schedules = if args.is_empty() {
                vec!["startup".to_string()]
            } else {
                args
            };
            Decorator::Trigger(TriggerSpec::Time(TimeTriggerSpec { schedules }))
        }
        "event_trigger" => {
            let mut args = args.into_iter();
            Decorator::Trigger(TriggerSpec::Event(EventTriggerSpec {
                event_type: args.next().unwrap_or_default(),
                predicate: args.next(),
            }))
        }
        "state_active" => Decorator::StateActive(ActiveGuardSpec {
            expr: args.into_iter().next().unwrap_or_default(),
        }),
        "task_unique" => Decorator::Unique(UniqueSpec {
            group: args.into_iter().next().unwrap_or_default(),
            policy: UniquePolicy::Kill {
                kill_me: call
                    .kwargs
                    .get("kill_me")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
        }),
        "task_queue" => Decorator::Unique(UniqueSpec {
            group: args.into_iter().next().unwrap_or_default(),
            policy: UniquePolicy::Queue,
        }),
        _ => return Err(DecoratorError::Unknown),
    };

    Ok(ParsedDecorator {
        decorator,
        ignored_keywords,
        valid_keywords,
    })
}

/// What survived validation for one function
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionDecorators {
    pub service: Option<ServiceSpec>,
    pub triggers: Vec<TriggerSpec>,
    pub active: Option<ActiveGuardSpec>,
    pub unique: Option<UniqueSpec>,
}

/// Validate every decorator on `function`, logging and dropping bad ones
pub fn process(function: &CompiledFunction, context: &str, config: &EngineConfig) -> FunctionDecorators {
    let func = function.name.as_str();
    let mut out = FunctionDecorators::default();
    let mut service_seen = false;

    for call in &function.decorators {
        let parsed = match parse(call) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("{} defined in {}: decorator @{} {}", func, context, call.name, err);
                continue;
            }
        };

        if !parsed.ignored_keywords.is_empty() {
            error!(
                "{} defined in {}: decorator @{} valid keyword arguments are: {}; others ignored: {}",
                func,
                context,
                call.name,
                parsed.valid_keywords.join(", "),
                parsed.ignored_keywords.join(", ")
            );
        }

        match parsed.decorator {
            Decorator::Service => {
                if service_seen {
                    debug!(function = func, context, "Repeated @service ignored");
                    continue;
                }
                service_seen = true;
                if config.is_reserved(func) {
                    warn!(
                        "function '{}' in {} with @service conflicts with builtin service; ignoring (please rename function)",
                        func, context
                    );
                    continue;
                }
                out.service = Some(ServiceSpec {
                    domain: config.domain.clone(),
                    name: func.to_string(),
                });
            }
            Decorator::Trigger(trigger) => out.triggers.push(trigger),
            Decorator::StateActive(guard) => {
                if out.active.is_some() {
                    warn!(
                        "{} defined in {}: decorator @{} used more than once; keeping the first",
                        func, context, call.name
                    );
                } else {
                    out.active = Some(guard);
                }
            }
            Decorator::Unique(unique) => {
                if out.unique.is_some() {
                    warn!(
                        "{} defined in {}: decorator @{} conflicts with an earlier uniqueness decorator; keeping the first",
                        func, context, call.name
                    );
                } else {
                    out.unique = Some(unique);
                }
            }
        }
    }

    out
}
