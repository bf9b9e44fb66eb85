//! A lexer, parser, evaluator and event-driven rule engine for chat-group
//! automation: the `WHEN ... WHERE ... THEN ... END` rule language and the
//! dispatcher that runs it against platform events.

pub mod actions;
pub mod ast;
pub mod builtins;
pub mod dispatcher;
pub mod error;
pub mod eval;
pub mod event;
pub mod executor;
pub mod media_group;
pub mod parse;
pub mod platform;
pub mod precompile;
pub mod print;
pub mod resolver;
pub mod scope;
pub mod store;
pub mod time;
pub mod token;
pub mod value;

pub use ast::{Rule, SharedRule, Trigger};
pub use dispatcher::{DispatcherConfig, EventDispatcher, InMemoryRuleRepository, RuleRecord, RuleRepository};
pub use error::{AdapterError, EvalError, FatalError, ResolveError, RuntimeError};
pub use event::{Event, EventPayload, EventTag, Message, User};
pub use executor::Outcome;
pub use parse::{parse_rule, ParseError};
pub use platform::{ChatMember, PlatformClient};
pub use precompile::precompile;
pub use print::print_rule;
pub use resolver::{DefaultResolver, EventContext, VariableResolver};
pub use store::{InMemoryStore, PersistentStore, StatKind, StatisticsStore};
pub use value::Value;
