//! `console.*` routed to tracing.

use crate::value;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleLevel {
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl ConsoleLevel {
    fn method(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    fn emit(self, message: &str) {
        match self {
            Self::Log | Self::Info => info!(target: "jsrunner::console", "{}", message),
            Self::Debug => debug!(target: "jsrunner::console", "{}", message),
            Self::Warn => warn!(target: "jsrunner::console", "{}", message),
            Self::Error => error!(target: "jsrunner::console", "{}", message),
        }
    }
}

/// Space-joined string forms, like a terminal console prints them.
fn format_args<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> String {
    args.iter()
        .map(|arg| value::display(ctx, arg))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn install<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;

    for level in [
        ConsoleLevel::Log,
        ConsoleLevel::Info,
        ConsoleLevel::Debug,
        ConsoleLevel::Warn,
        ConsoleLevel::Error,
    ] {
        let method = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            level.emit(&format_args(&ctx, &args.0));
        })?;
        console.set(level.method(), method)?;
    }

    ctx.globals().set("console", console)
}
