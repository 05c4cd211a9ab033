//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! Registration surface for commands and methods.
//!
//! Every operation is named within its owning [`OperationInterface`], carries
//! a description and a positional signature of described arguments, and is
//! invoked with `Value` arguments checked against that signature before any
//! code runs.

use std::fmt;
use std::sync::Arc;

use r_ctl_expr::{TypeTag, Value};
use r_ctl_registry::NameServer;

use crate::command::{Command, Completion};
use crate::error::{InvocationError, MethodError};

/// One named, typed parameter of a command or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub description: String,
    pub tag: TypeTag,
}

impl ArgumentDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tag,
        }
    }
}

/// Check positional argument tags against a signature.
pub fn check_signature<I>(
    operation: &str,
    arguments: &[ArgumentDescriptor],
    found: I,
) -> Result<(), InvocationError>
where
    I: IntoIterator<Item = TypeTag>,
    I::IntoIter: ExactSizeIterator,
{
    let found = found.into_iter();
    if found.len() != arguments.len() {
        return Err(InvocationError::WrongArity {
            operation: operation.to_string(),
            expected: arguments.len(),
            found: found.len(),
        });
    }
    for (index, (descriptor, tag)) in arguments.iter().zip(found).enumerate() {
        if descriptor.tag != tag {
            return Err(InvocationError::WrongType {
                operation: operation.to_string(),
                index,
                name: descriptor.name.clone(),
                expected: descriptor.tag,
                found: tag,
            });
        }
    }
    Ok(())
}

type DispatchBody<C> = dyn Fn(&mut C, &[Value]) -> bool + Send + Sync;
type CompletionBody<C> = dyn Fn(&C, &[Value]) -> Completion + Send + Sync;
type MethodBody<C> = dyn Fn(&mut C, &[Value]) -> Result<Value, MethodError> + Send + Sync;

/// Factory for [`Command`]s of one registered command.
pub struct CommandSpec<C> {
    name: Arc<str>,
    description: String,
    arguments: Vec<ArgumentDescriptor>,
    dispatch: Arc<DispatchBody<C>>,
    completion: Arc<CompletionBody<C>>,
    timeout: Option<u64>,
}

impl<C: 'static> CommandSpec<C> {
    pub fn new<D, P>(
        name: impl Into<Arc<str>>,
        description: impl Into<String>,
        dispatch: D,
        completion: P,
    ) -> Self
    where
        D: Fn(&mut C, &[Value]) -> bool + Send + Sync + 'static,
        P: Fn(&C, &[Value]) -> Completion + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
            dispatch: Arc::new(dispatch),
            completion: Arc::new(completion),
            timeout: None,
        }
    }

    /// Append a positional argument to the signature.
    pub fn arg(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        tag: TypeTag,
    ) -> Self {
        self.arguments
            .push(ArgumentDescriptor::new(name, description, tag));
        self
    }

    /// Commands built from this spec fail after `cycles` pending polls.
    pub fn with_timeout(mut self, cycles: u64) -> Self {
        self.timeout = Some(cycles);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn arguments(&self) -> &[ArgumentDescriptor] {
        &self.arguments
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn check<I>(&self, found: I) -> Result<(), InvocationError>
    where
        I: IntoIterator<Item = TypeTag>,
        I::IntoIter: ExactSizeIterator,
    {
        check_signature(&self.name, &self.arguments, found)
    }

    /// Validate `args` and bind them into a fresh command.
    pub fn instantiate(&self, args: Vec<Value>) -> Result<Command<C>, InvocationError> {
        self.check(args.iter().map(Value::tag))?;
        Ok(self.bind(args))
    }

    /// Bind already validated arguments.
    pub(crate) fn bind(&self, args: Vec<Value>) -> Command<C> {
        let args: Arc<[Value]> = args.into();
        let dispatch = self.dispatch.clone();
        let completion = self.completion.clone();
        let dispatch_args = args.clone();
        let command = Command::new(
            self.name.clone(),
            move |ctx: &mut C| dispatch(ctx, &dispatch_args),
            move |ctx: &C| completion(ctx, &args),
        );
        match self.timeout {
            Some(cycles) => command.with_timeout(cycles),
            None => command,
        }
    }
}

impl<C> fmt::Debug for CommandSpec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A synchronous operation returning a value of a declared type.
pub struct MethodSpec<C> {
    name: String,
    description: String,
    arguments: Vec<ArgumentDescriptor>,
    returns: TypeTag,
    body: Arc<MethodBody<C>>,
}

impl<C> MethodSpec<C> {
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        returns: TypeTag,
        body: F,
    ) -> Self
    where
        F: Fn(&mut C, &[Value]) -> Result<Value, MethodError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
            returns,
            body: Arc::new(body),
        }
    }

    pub fn arg(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        tag: TypeTag,
    ) -> Self {
        self.arguments
            .push(ArgumentDescriptor::new(name, description, tag));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn arguments(&self) -> &[ArgumentDescriptor] {
        &self.arguments
    }

    pub fn returns(&self) -> TypeTag {
        self.returns
    }

    pub fn check<I>(&self, found: I) -> Result<(), InvocationError>
    where
        I: IntoIterator<Item = TypeTag>,
        I::IntoIter: ExactSizeIterator,
    {
        check_signature(&self.name, &self.arguments, found)
    }

    /// Validate `args` and run the method body.
    pub fn call(&self, ctx: &mut C, args: &[Value]) -> Result<Value, InvocationError> {
        self.check(args.iter().map(Value::tag))?;
        Ok(self.invoke(ctx, args)?)
    }

    /// Run the body on already validated arguments.
    pub(crate) fn invoke(&self, ctx: &mut C, args: &[Value]) -> Result<Value, MethodError> {
        let value = (self.body)(ctx, args)?;
        if value.tag() != self.returns {
            return Err(MethodError::Failed(format!(
                "'{}' returned {} instead of {}",
                self.name,
                value.tag(),
                self.returns
            )));
        }
        Ok(value)
    }
}

impl<C> fmt::Debug for MethodSpec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSpec")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("returns", &self.returns)
            .finish_non_exhaustive()
    }
}

pub type CommandRepository<C> = NameServer<Arc<CommandSpec<C>>>;
pub type MethodRepository<C> = NameServer<Arc<MethodSpec<C>>>;

/// A named object exposing commands and methods.
pub struct OperationInterface<C> {
    name: String,
    description: String,
    commands: CommandRepository<C>,
    methods: MethodRepository<C>,
}

impl<C: 'static> OperationInterface<C> {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            commands: NameServer::new(),
            methods: NameServer::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns `false` when a command of that name already exists.
    pub fn add_command(&mut self, spec: CommandSpec<C>) -> bool {
        let name = spec.name().to_string();
        self.commands.register_object(Arc::new(spec), name)
    }

    /// Returns `false` when a method of that name already exists.
    pub fn add_method(&mut self, spec: MethodSpec<C>) -> bool {
        let name = spec.name().to_string();
        self.methods.register_object(Arc::new(spec), name)
    }

    pub fn with_command(mut self, spec: CommandSpec<C>) -> Self {
        self.add_command(spec);
        self
    }

    pub fn with_method(mut self, spec: MethodSpec<C>) -> Self {
        self.add_method(spec);
        self
    }

    pub fn command(&self, name: &str) -> Option<&Arc<CommandSpec<C>>> {
        self.commands.get_object(name)
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodSpec<C>>> {
        self.methods.get_object(name)
    }

    pub fn commands(&self) -> &CommandRepository<C> {
        &self.commands
    }

    pub fn methods(&self) -> &MethodRepository<C> {
        &self.methods
    }

    pub fn remove_command(&mut self, name: &str) -> bool {
        self.commands.unregister_name(name).is_some()
    }

    pub fn remove_method(&mut self, name: &str) -> bool {
        self.methods.unregister_name(name).is_some()
    }

    /// Look up a command, reporting which part of the path is missing.
    pub fn require_command(&self, name: &str) -> Result<&Arc<CommandSpec<C>>, InvocationError> {
        self.command(name)
            .ok_or_else(|| InvocationError::UnknownOperation {
                object: self.name.clone(),
                operation: name.to_string(),
            })
    }

    pub fn require_method(&self, name: &str) -> Result<&Arc<MethodSpec<C>>, InvocationError> {
        self.method(name)
            .ok_or_else(|| InvocationError::UnknownOperation {
                object: self.name.clone(),
                operation: name.to_string(),
            })
    }
}

impl<C> fmt::Debug for OperationInterface<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationInterface")
            .field("name", &self.name)
            .field("commands", &self.commands.names().collect::<Vec<_>>())
            .field("methods", &self.methods.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;

    #[derive(Default)]
    struct Gripper {
        width: f64,
        target: f64,
    }

    fn gripper() -> OperationInterface<Gripper> {
        OperationInterface::new("gripper", "parallel jaw gripper")
            .with_command(
                CommandSpec::new(
                    "open",
                    "open the jaws to a width",
                    |g: &mut Gripper, args: &[Value]| {
                        g.target = args[0].as_double().unwrap_or_default();
                        true
                    },
                    |g: &Gripper, args: &[Value]| {
                        Completion::from(Some(g.width) == args[0].as_double())
                    },
                )
                .arg("width", "jaw opening in metres", TypeTag::Double),
            )
            .with_method(MethodSpec::new(
                "width",
                "current jaw opening",
                TypeTag::Double,
                |g: &mut Gripper, _: &[Value]| Ok(Value::Double(g.width)),
            ))
    }

    #[test]
    fn first_registration_wins() {
        let mut object = gripper();
        let shadow = MethodSpec::new("width", "shadow", TypeTag::Int, |_: &mut Gripper, _: &[Value]| {
            Ok(Value::Int(0))
        });
        assert!(!object.add_method(shadow));
        assert_eq!(object.method("width").unwrap().returns(), TypeTag::Double);
    }

    #[test]
    fn wrong_arguments_never_dispatch() {
        let object = gripper();
        let open = object.command("open").unwrap();
        assert!(matches!(
            open.instantiate(vec![]),
            Err(InvocationError::WrongArity { expected: 1, found: 0, .. })
        ));
        assert!(matches!(
            open.instantiate(vec![Value::Int(3)]),
            Err(InvocationError::WrongType { index: 0, expected: TypeTag::Double, found: TypeTag::Int, .. })
        ));
    }

    #[test]
    fn bound_arguments_reach_both_phases() {
        let object = gripper();
        let mut g = Gripper::default();
        let mut command = object
            .command("open")
            .unwrap()
            .instantiate(vec![Value::Double(0.04)])
            .unwrap();
        assert!(command.dispatch(&mut g));
        assert_eq!(g.target, 0.04);
        assert_eq!(command.poll(&g), CommandStatus::Dispatched);
        g.width = 0.04;
        assert_eq!(command.poll(&g), CommandStatus::Done);
    }

    #[test]
    fn methods_check_their_return_type() {
        let mut g = Gripper::default();
        let liar = MethodSpec::new("liar", "", TypeTag::Bool, |_: &mut Gripper, _: &[Value]| {
            Ok(Value::Int(1))
        });
        assert!(liar.call(&mut g, &[]).is_err());
        let object = gripper();
        assert_eq!(
            object.method("width").unwrap().call(&mut g, &[]),
            Ok(Value::Double(0.0))
        );
    }

    #[test]
    fn missing_operations_name_the_object() {
        let object = gripper();
        let err = object.require_command("close").unwrap_err();
        assert_eq!(err.to_string(), "object 'gripper' has no operation 'close'");
    }
}
