//! ---
//! rctl_section: "01-core-functionality"
//! rctl_subsection: "binary"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Objects the daemon exposes to scripts."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
use r_ctl_exec::{CommandSpec, Completion, ExecutionContext, MethodSpec, OperationInterface};
use r_ctl_expr::{TypeTag, Value};
use tracing::info;

/// State of the daemon's own component.
#[derive(Debug, Default)]
pub struct Daemon {
    /// Cycle at which the latest `clock.delay` completes.
    pub delay_until: u64,
    pub messages: u64,
}

type Ctx = ExecutionContext<Daemon>;

/// `clock`: cycle counter and cycle-based delays.
pub fn clock() -> OperationInterface<Ctx> {
    OperationInterface::new("clock", "engine cycle clock")
        .with_command(
            CommandSpec::new(
                "delay",
                "complete after the given number of cycles",
                |ctx: &mut Ctx, args: &[Value]| {
                    let cycles = args[0].as_uint().unwrap_or_default();
                    ctx.component.delay_until = ctx.cycle() + cycles;
                    true
                },
                |ctx: &Ctx, _: &[Value]| Completion::from(ctx.cycle() >= ctx.component.delay_until),
            )
            .arg("cycles", "cycles to wait", TypeTag::UInt),
        )
        .with_method(MethodSpec::new(
            "cycle",
            "current cycle number",
            TypeTag::UInt,
            |ctx: &mut Ctx, _: &[Value]| Ok(Value::UInt(ctx.cycle())),
        ))
}

/// `log`: lets scripts emit log events.
pub fn log() -> OperationInterface<Ctx> {
    OperationInterface::new("log", "script log output").with_method(
        MethodSpec::new(
            "info",
            "log a message at info level",
            TypeTag::Bool,
            |ctx: &mut Ctx, args: &[Value]| {
                let message = args[0].as_str().unwrap_or_default();
                info!(cycle = ctx.cycle(), %message, "script message");
                ctx.component.messages += 1;
                Ok(Value::Bool(true))
            },
        )
        .arg("message", "text to log", TypeTag::String),
    )
}
