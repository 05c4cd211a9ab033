//! ---
//! rctl_section: "04-execution-engine"
//! rctl_subsection: "module"
//! rctl_type: "source"
//! rctl_scope: "code"
//! rctl_description: "Command protocol, scriptable units, and the execution engine."
//! rctl_version: "v0.0.0-prealpha"
//! rctl_owner: "tbd"
//! ---
//! TOML script documents and their compilation into programs and state
//! machines.
//!
//! Every operator, object, command and method a script names is resolved
//! here. A document that loads cannot fail on a missing operation later.
//!
//! ```toml
//! [[programs]]
//! name = "approach"
//! variables = { reached = { type = "bool", value = false } }
//! instructions = [
//!   { dispatch = { object = "drive", command = "moveTo", args = [{ literal = { type = "int", value = 3 } }] } },
//!   { assign = { variable = "reached", value = { literal = { type = "bool", value = true } } } },
//! ]
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use r_ctl_expr::{AnyDataSource, Expr, ExpressionComposer, Scope, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::engine::ObjectRegistry;
use crate::error::{InvocationError, LifecycleError, LoadError};
use crate::instruction::{CommandCall, Instruction, MethodCall};
use crate::program::Program;
use crate::state_machine::{StateDefinition, StateMachine};

/// One script file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptDocument {
    pub programs: Vec<ProgramScript>,
    pub state_machines: Vec<StateMachineScript>,
}

impl ScriptDocument {
    pub fn unit_names(&self) -> impl Iterator<Item = &str> {
        self.programs
            .iter()
            .map(|program| program.name.as_str())
            .chain(self.state_machines.iter().map(|machine| machine.name.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramScript {
    pub name: String,
    /// Variables local to the program, with their initial values.
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub instructions: Vec<InstructionDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionDoc {
    Evaluate(Expr),
    Wait(Expr),
    Dispatch {
        object: String,
        command: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Assign {
        variable: String,
        value: Expr,
    },
    Call {
        object: String,
        method: String,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        into: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateMachineScript {
    pub name: String,
    /// Defaults to the first state.
    #[serde(default)]
    pub initial: Option<String>,
    /// Variables shared by every state of the machine.
    #[serde(default)]
    pub variables: IndexMap<String, Value>,
    #[serde(default)]
    pub states: Vec<StateScript>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateScript {
    pub name: String,
    #[serde(default)]
    pub entry: Vec<InstructionDoc>,
    #[serde(default)]
    pub run: Vec<InstructionDoc>,
    #[serde(default)]
    pub exit: Vec<InstructionDoc>,
    #[serde(default)]
    pub transitions: Vec<TransitionDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionDoc {
    pub guard: Expr,
    pub target: String,
}

pub fn parse_script(text: &str, path: &Path) -> Result<ScriptDocument, LoadError> {
    toml::from_str(text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_script_file(path: impl AsRef<Path>) -> Result<ScriptDocument, LoadError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document = parse_script(&text, path)?;
    debug!(
        path = %path.display(),
        programs = document.programs.len(),
        state_machines = document.state_machines.len(),
        "script parsed"
    );
    Ok(document)
}

type Ctx<S> = ExecutionContext<S>;

/// Compiles script documents against the objects of one engine.
///
/// Each unit sees the `globals` scope plus its own declared variables.
pub struct ScriptCompiler<'a, S> {
    composer: &'a ExpressionComposer,
    objects: &'a ObjectRegistry<S>,
    globals: &'a Scope,
}

impl<'a, S: 'static> ScriptCompiler<'a, S> {
    pub fn new(
        composer: &'a ExpressionComposer,
        objects: &'a ObjectRegistry<S>,
        globals: &'a Scope,
    ) -> Self {
        Self {
            composer,
            objects,
            globals,
        }
    }

    /// Compile every unit of the document. Unit names must be unique within
    /// the document.
    #[allow(clippy::type_complexity)]
    pub fn compile(
        &self,
        document: &ScriptDocument,
    ) -> Result<(Vec<Program<Ctx<S>>>, Vec<StateMachine<Ctx<S>>>), LoadError> {
        let mut seen = HashSet::new();
        for name in document.unit_names() {
            if !seen.insert(name) {
                return Err(LifecycleError::AlreadyLoaded(name.to_string()).into());
            }
        }
        let programs = document
            .programs
            .iter()
            .map(|program| self.compile_program(program))
            .collect::<Result<Vec<_>, _>>()?;
        let machines = document
            .state_machines
            .iter()
            .map(|machine| self.compile_state_machine(machine))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((programs, machines))
    }

    pub fn compile_program(&self, script: &ProgramScript) -> Result<Program<Ctx<S>>, LoadError> {
        let scope = self.unit_scope(&script.variables);
        let instructions = self.compile_list(&script.name, &scope, &script.instructions)?;
        Ok(Program::new(script.name.clone(), instructions))
    }

    pub fn compile_state_machine(
        &self,
        script: &StateMachineScript,
    ) -> Result<StateMachine<Ctx<S>>, LoadError> {
        let unit = script.name.as_str();
        let scope = self.unit_scope(&script.variables);
        let mut states = Vec::with_capacity(script.states.len());
        for state in &script.states {
            let mut definition = StateDefinition::new(state.name.clone())
                .entry(self.compile_list(unit, &scope, &state.entry)?)
                .run(self.compile_list(unit, &scope, &state.run)?)
                .exit(self.compile_list(unit, &scope, &state.exit)?);
            for transition in &state.transitions {
                let guard = self
                    .composer
                    .compose_bool(&transition.guard, &scope)
                    .map_err(|source| compile_error(unit, source))?;
                definition = definition.transition(guard, transition.target.clone());
            }
            states.push(definition);
        }
        StateMachine::new(script.name.clone(), states, script.initial.as_deref())
    }

    fn unit_scope(&self, variables: &IndexMap<String, Value>) -> Scope {
        let mut scope = self.globals.clone();
        for (name, initial) in variables {
            scope.declare(name.clone(), initial.clone());
        }
        scope
    }

    fn compile_list(
        &self,
        unit: &str,
        scope: &Scope,
        docs: &[InstructionDoc],
    ) -> Result<Vec<Instruction<Ctx<S>>>, LoadError> {
        docs.iter()
            .map(|doc| self.compile_instruction(unit, scope, doc))
            .collect()
    }

    fn compile_instruction(
        &self,
        unit: &str,
        scope: &Scope,
        doc: &InstructionDoc,
    ) -> Result<Instruction<Ctx<S>>, LoadError> {
        match doc {
            InstructionDoc::Evaluate(condition) => self
                .composer
                .compose_bool(condition, scope)
                .map(Instruction::Evaluate)
                .map_err(|source| compile_error(unit, source)),
            InstructionDoc::Wait(condition) => self
                .composer
                .compose_bool(condition, scope)
                .map(Instruction::Wait)
                .map_err(|source| compile_error(unit, source)),
            InstructionDoc::Dispatch {
                object,
                command,
                args,
            } => {
                let spec = self
                    .interface(unit, object)?
                    .require_command(command)
                    .cloned()
                    .map_err(|source| invocation_error(unit, source))?;
                let args = self.compose_args(unit, scope, args)?;
                spec.check(args.iter().map(AnyDataSource::tag))
                    .map_err(|source| invocation_error(unit, source))?;
                Ok(Instruction::Dispatch(CommandCall {
                    object: object.clone(),
                    spec,
                    args,
                }))
            }
            InstructionDoc::Assign { variable, value } => {
                let target = self.variable(unit, scope, variable)?;
                let value = self
                    .composer
                    .compose(value, scope)
                    .map_err(|source| compile_error(unit, source))?;
                if value.tag() != target.tag() {
                    return Err(LoadError::AssignmentType {
                        unit: unit.to_string(),
                        variable: variable.clone(),
                        expected: target.tag(),
                        found: value.tag(),
                    });
                }
                Ok(Instruction::Assign {
                    variable: target,
                    value,
                })
            }
            InstructionDoc::Call {
                object,
                method,
                args,
                into,
            } => {
                let spec = self
                    .interface(unit, object)?
                    .require_method(method)
                    .cloned()
                    .map_err(|source| invocation_error(unit, source))?;
                let args = self.compose_args(unit, scope, args)?;
                spec.check(args.iter().map(AnyDataSource::tag))
                    .map_err(|source| invocation_error(unit, source))?;
                let into = match into {
                    Some(name) => {
                        let target = self.variable(unit, scope, name)?;
                        if target.tag() != spec.returns() {
                            return Err(LoadError::AssignmentType {
                                unit: unit.to_string(),
                                variable: name.clone(),
                                expected: target.tag(),
                                found: spec.returns(),
                            });
                        }
                        Some(target)
                    }
                    None => None,
                };
                Ok(Instruction::Call(MethodCall {
                    object: object.clone(),
                    spec,
                    args,
                    into,
                }))
            }
        }
    }

    fn interface(
        &self,
        unit: &str,
        object: &str,
    ) -> Result<&'a std::sync::Arc<crate::interface::OperationInterface<Ctx<S>>>, LoadError> {
        self.objects
            .get_object(object)
            .ok_or_else(|| invocation_error(unit, InvocationError::UnknownObject(object.into())))
    }

    fn variable(
        &self,
        unit: &str,
        scope: &Scope,
        name: &str,
    ) -> Result<r_ctl_expr::AnyVariable, LoadError> {
        scope
            .variable(name)
            .cloned()
            .ok_or_else(|| LoadError::UndeclaredVariable {
                unit: unit.to_string(),
                variable: name.to_string(),
            })
    }

    fn compose_args(
        &self,
        unit: &str,
        scope: &Scope,
        args: &[Expr],
    ) -> Result<Vec<AnyDataSource>, LoadError> {
        args.iter()
            .map(|arg| {
                self.composer
                    .compose(arg, scope)
                    .map_err(|source| compile_error(unit, source))
            })
            .collect()
    }
}

fn compile_error(unit: &str, source: r_ctl_expr::CompileError) -> LoadError {
    LoadError::Compile {
        unit: unit.to_string(),
        source,
    }
}

fn invocation_error(unit: &str, source: InvocationError) -> LoadError {
    LoadError::Invocation {
        unit: unit.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const DOCUMENT: &str = r#"
[[programs]]
name = "count"
variables = { n = { type = "int", value = 0 } }
instructions = [
  { assign = { variable = "n", value = { apply = { op = "+", args = [{ var = "n" }, { literal = { type = "int", value = 1 } }] } } } },
  { evaluate = { apply = { op = "==", args = [{ var = "n" }, { literal = { type = "int", value = 1 } }] } } },
]

[[state_machines]]
name = "toggle"
initial = "off"

[[state_machines.states]]
name = "off"
transitions = [{ guard = { var = "enabled" }, target = "on" }]

[[state_machines.states]]
name = "on"
"#;

    fn globals() -> Scope {
        let mut scope = Scope::new();
        scope.declare("enabled", Value::Bool(false));
        scope
    }

    #[test]
    fn parses_programs_and_machines() {
        let document = parse_script(DOCUMENT, &PathBuf::from("inline.toml")).unwrap();
        assert_eq!(document.programs.len(), 1);
        assert_eq!(document.programs[0].instructions.len(), 2);
        assert_eq!(document.state_machines[0].states.len(), 2);
        assert_eq!(
            document.unit_names().collect::<Vec<_>>(),
            vec!["count", "toggle"]
        );
    }

    #[test]
    fn compiles_against_globals() {
        let document = parse_script(DOCUMENT, &PathBuf::from("inline.toml")).unwrap();
        let composer = ExpressionComposer::default();
        let objects: ObjectRegistry<()> = ObjectRegistry::new();
        let globals = globals();
        let (programs, machines) = ScriptCompiler::new(&composer, &objects, &globals)
            .compile(&document)
            .unwrap();
        assert_eq!(programs[0].len(), 2);
        assert_eq!(machines[0].initial_state(), "off");
    }

    #[test]
    fn unknown_names_fail_to_load() {
        let composer = ExpressionComposer::default();
        let objects: ObjectRegistry<()> = ObjectRegistry::new();
        let globals = Scope::new();
        let compiler = ScriptCompiler::new(&composer, &objects, &globals);

        let dispatch = ProgramScript {
            name: "p".into(),
            variables: IndexMap::new(),
            instructions: vec![InstructionDoc::Dispatch {
                object: "drive".into(),
                command: "moveTo".into(),
                args: vec![],
            }],
        };
        assert!(matches!(
            compiler.compile_program(&dispatch),
            Err(LoadError::Invocation {
                source: InvocationError::UnknownObject(_),
                ..
            })
        ));

        let assign = ProgramScript {
            name: "p".into(),
            variables: IndexMap::new(),
            instructions: vec![InstructionDoc::Assign {
                variable: "x".into(),
                value: Expr::literal(1i64),
            }],
        };
        assert!(matches!(
            compiler.compile_program(&assign),
            Err(LoadError::UndeclaredVariable { .. })
        ));
    }

    #[test]
    fn assignment_types_are_checked() {
        let composer = ExpressionComposer::default();
        let objects: ObjectRegistry<()> = ObjectRegistry::new();
        let globals = Scope::new();
        let mut variables = IndexMap::new();
        variables.insert("flag".to_string(), Value::Bool(false));
        let script = ProgramScript {
            name: "p".into(),
            variables,
            instructions: vec![InstructionDoc::Assign {
                variable: "flag".into(),
                value: Expr::literal(2.5),
            }],
        };
        let err = ScriptCompiler::new(&composer, &objects, &globals)
            .compile_program(&script)
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "p: cannot assign double to 'flag' of type bool"
        );
    }

    #[test]
    fn duplicate_unit_names_are_rejected() {
        let text = r#"
[[programs]]
name = "twin"

[[state_machines]]
name = "twin"
states = [{ name = "only" }]
"#;
        let document = parse_script(text, &PathBuf::from("dup.toml")).unwrap();
        let composer = ExpressionComposer::default();
        let objects: ObjectRegistry<()> = ObjectRegistry::new();
        let globals = Scope::new();
        assert!(matches!(
            ScriptCompiler::new(&composer, &objects, &globals).compile(&document),
            Err(LoadError::Lifecycle(LifecycleError::AlreadyLoaded(_)))
        ));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let err = parse_script("programs = 3", &PathBuf::from("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
