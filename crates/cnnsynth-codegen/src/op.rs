//! Abstract operations and their C rendering.
//!
//! An [`Operation`] is one unit of emitted behaviour. The sequencer builds
//! operations and hands them straight to the emitter, which renders them at
//! the current nesting depth; nothing is stored or replayed.

use crate::config::FailPolicy;

const INDENT: &str = "  ";

/// A memory-mapped register target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Register {
    /// Raw absolute address, rendered as a volatile pointer dereference.
    Address(u32),
    /// Symbolic register from the vendor headers (e.g. `MXC_GCR->pclkdiv`).
    Named(String),
}

impl Register {
    pub fn named(name: impl Into<String>) -> Self {
        Register::Named(name.into())
    }

    fn render(&self) -> String {
        match self {
            Register::Address(addr) => format!("*((volatile uint32_t *) 0x{addr:08x})"),
            Register::Named(name) => name.clone(),
        }
    }
}

/// Register write flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    /// `=`
    Assign,
    /// `|=`
    Or,
    /// `&=`
    And,
}

impl WriteOp {
    fn symbol(self) -> &'static str {
        match self {
            WriteOp::Assign => "=",
            WriteOp::Or => "|=",
            WriteOp::And => "&=",
        }
    }
}

/// The target of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// A function emitted by this synthesis run; must resolve to a definition.
    Local(String),
    /// A function provided by the SDK, the simulation harness or other
    /// generated sources.
    External(String),
}

impl Callee {
    pub fn local(name: impl Into<String>) -> Self {
        Callee::Local(name.into())
    }

    pub fn external(name: impl Into<String>) -> Self {
        Callee::External(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Callee::Local(name) | Callee::External(name) => name,
        }
    }
}

/// Instruction used to sleep until the completion interrupt fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepInstruction {
    /// CMSIS `__WFI()` on the ARM core.
    Arm,
    /// Inline `wfi` on the RISC-V companion.
    RiscV,
}

/// How an emitted completion wait is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionWait {
    /// Sleep until the ISR stamps `cnn_time`.
    Sleep(SleepInstruction),
    /// Busy-loop until the ISR stamps `cnn_time`.
    Spin,
    /// Call the polling `cnn_wait()` function.
    Poll,
}

/// One unit of emitted behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `#include <..>` when `system`, `#include ".."` otherwise.
    Include {
        header: String,
        system: bool,
        comment: Option<String>,
    },
    /// `#define NAME VALUE`
    Define { name: String, value: String },
    /// A declaration, either at file scope or local to a function.
    Declare(String),
    /// Any other single C statement.
    Statement {
        text: String,
        comment: Option<String>,
    },
    RegisterWrite {
        register: Register,
        op: WriteOp,
        value: String,
        comment: Option<String>,
    },
    Call {
        callee: Callee,
        args: Vec<String>,
        comment: Option<String>,
    },
    /// `NVIC_SetVector(irq, handler);`
    InstallVector {
        irq: String,
        handler: String,
        comment: Option<String>,
    },
    /// `while (condition) ;`
    WaitUntil {
        condition: String,
        comment: Option<String>,
    },
    /// Wait for the accelerator to finish the current run.
    AwaitCompletion(CompletionWait),
    /// Single operation under an `if` with no braces.
    Guarded {
        condition: String,
        body: Box<Operation>,
    },
    /// `for (i = 0; i < count; i++) { body }`
    Repeat { count: u32, body: Vec<Operation> },
    /// `while (1) { body }`
    Forever { body: Vec<Operation> },
    /// Fatal check on a function returning `CNN_OK` on success.
    Check { callee: Callee, policy: FailPolicy },
    Comment(String),
    Blank,
    /// Preformatted text; each line is indented at the current depth except
    /// preprocessor directives.
    Verbatim(String),
}

impl Operation {
    pub fn comment(text: impl Into<String>) -> Self {
        Operation::Comment(text.into())
    }

    pub fn declare(text: impl Into<String>) -> Self {
        Operation::Declare(text.into())
    }

    pub fn statement(text: impl Into<String>) -> Self {
        Operation::Statement {
            text: text.into(),
            comment: None,
        }
    }

    pub fn include(header: impl Into<String>) -> Self {
        Operation::Include {
            header: header.into(),
            system: false,
            comment: None,
        }
    }

    pub fn system_include(header: impl Into<String>) -> Self {
        Operation::Include {
            header: header.into(),
            system: true,
            comment: None,
        }
    }

    pub fn define(name: impl Into<String>, value: impl ToString) -> Self {
        Operation::Define {
            name: name.into(),
            value: value.to_string(),
        }
    }

    pub fn write(register: Register, op: WriteOp, value: impl Into<String>) -> Self {
        Operation::RegisterWrite {
            register,
            op,
            value: value.into(),
            comment: None,
        }
    }

    pub fn call(callee: Callee, args: &[&str]) -> Self {
        Operation::Call {
            callee,
            args: args.iter().map(|a| a.to_string()).collect(),
            comment: None,
        }
    }

    pub fn call_external(name: &str) -> Self {
        Self::call(Callee::external(name), &[])
    }

    pub fn call_local(name: &str) -> Self {
        Self::call(Callee::local(name), &[])
    }

    pub fn wait_until(condition: impl Into<String>) -> Self {
        Operation::WaitUntil {
            condition: condition.into(),
            comment: None,
        }
    }

    pub fn verbatim(text: impl Into<String>) -> Self {
        Operation::Verbatim(text.into())
    }

    /// Attach a trailing `// comment`. Has no effect on variants that
    /// cannot carry one.
    pub fn with_comment(mut self, text: impl Into<String>) -> Self {
        match &mut self {
            Operation::Include { comment, .. }
            | Operation::Statement { comment, .. }
            | Operation::RegisterWrite { comment, .. }
            | Operation::Call { comment, .. }
            | Operation::InstallVector { comment, .. }
            | Operation::WaitUntil { comment, .. } => *comment = Some(text.into()),
            _ => {}
        }
        self
    }

    /// Names of locally emitted functions this operation calls or references.
    pub fn local_references(&self, out: &mut Vec<String>) {
        match self {
            Operation::Call {
                callee: Callee::Local(name),
                ..
            } => out.push(name.clone()),
            Operation::InstallVector { handler, .. } => out.push(handler.clone()),
            Operation::AwaitCompletion(CompletionWait::Poll) => out.push("cnn_wait".into()),
            Operation::Check { callee, policy } => {
                if let Callee::Local(name) = callee {
                    out.push(name.clone());
                }
                if *policy == FailPolicy::Halt {
                    out.push("fail".into());
                }
            }
            Operation::Guarded { body, .. } => body.local_references(out),
            Operation::Repeat { body, .. } | Operation::Forever { body } => {
                for op in body {
                    op.local_references(out);
                }
            }
            _ => {}
        }
    }

    /// Render at nesting `depth`, appending complete lines to `out`.
    pub fn render(&self, depth: usize, out: &mut String) {
        let pad = INDENT.repeat(depth);
        match self {
            Operation::Include {
                header,
                system,
                comment,
            } => {
                let line = if *system {
                    format!("#include <{header}>")
                } else {
                    format!("#include \"{header}\"")
                };
                push_line(out, "", &line, comment.as_deref());
            }
            Operation::Define { name, value } => {
                push_line(out, "", &format!("#define {name} {value}"), None)
            }
            Operation::Declare(text) => push_line(out, &pad, text, None),
            Operation::Statement { text, comment } => {
                push_line(out, &pad, text, comment.as_deref())
            }
            Operation::RegisterWrite {
                register,
                op,
                value,
                comment,
            } => {
                let lhs = format!("{} {} ", register.render(), op.symbol());
                // Continuation lines line up under the first value line.
                let hang = " ".repeat(lhs.len());
                let mut text = lhs;
                for (i, part) in value.lines().enumerate() {
                    if i > 0 {
                        text.push('\n');
                        text.push_str(&pad);
                        text.push_str(&hang);
                    }
                    text.push_str(part);
                }
                text.push(';');
                push_line(out, &pad, &text, comment.as_deref());
            }
            Operation::Call {
                callee,
                args,
                comment,
            } => {
                let text = format!("{}({});", callee.name(), args.join(", "));
                push_line(out, &pad, &text, comment.as_deref());
            }
            Operation::InstallVector {
                irq,
                handler,
                comment,
            } => {
                let text = format!("NVIC_SetVector({irq}, {handler});");
                push_line(out, &pad, &text, comment.as_deref());
            }
            Operation::WaitUntil { condition, comment } => {
                let text = format!("while ({condition}) ;");
                push_line(out, &pad, &text, comment.as_deref());
            }
            Operation::AwaitCompletion(wait) => match wait {
                CompletionWait::Sleep(instruction) => {
                    push_line(out, &pad, "while (cnn_time == 0)", None);
                    let sleep = match instruction {
                        SleepInstruction::Arm => "__WFI();",
                        SleepInstruction::RiscV => "asm volatile(\"wfi\");",
                    };
                    let inner = format!("{pad}{INDENT}");
                    push_line(out, &inner, sleep, Some("Wait for CNN"));
                }
                CompletionWait::Spin => {
                    push_line(out, &pad, "while (cnn_time == 0);", Some("Spin wait"))
                }
                CompletionWait::Poll => push_line(out, &pad, "cnn_wait();", None),
            },
            Operation::Guarded { condition, body } => {
                push_line(out, &pad, &format!("if ({condition})"), None);
                body.render(depth + 1, out);
            }
            Operation::Repeat { count, body } => {
                push_line(out, &pad, &format!("for (i = 0; i < {count}; i++) {{"), None);
                for op in body {
                    op.render(depth + 1, out);
                }
                push_line(out, &pad, "}", None);
            }
            Operation::Forever { body } => {
                push_line(out, &pad, "while (1) {", None);
                for op in body {
                    op.render(depth + 1, out);
                }
                push_line(out, &pad, "}", None);
            }
            Operation::Check { callee, policy } => {
                let action = match policy {
                    FailPolicy::Halt => "fail();",
                    FailPolicy::AbortAndReturn => "{ fail(); pass(); return 0; }",
                };
                let text = format!("if ({}() != CNN_OK) {action}", callee.name());
                push_line(out, &pad, &text, None);
            }
            Operation::Comment(text) => {
                push_line(out, &pad, &format!("// {text}"), None);
            }
            Operation::Blank => out.push('\n'),
            Operation::Verbatim(text) => {
                for line in text.lines() {
                    if line.is_empty() {
                        out.push('\n');
                    } else if line.starts_with('#') {
                        push_line(out, "", line, None);
                    } else {
                        push_line(out, &pad, line, None);
                    }
                }
            }
        }
    }
}

fn push_line(out: &mut String, pad: &str, text: &str, comment: Option<&str>) {
    out.push_str(pad);
    out.push_str(text);
    if let Some(comment) = comment {
        out.push_str(" // ");
        out.push_str(comment);
    }
    out.push('\n');
}

/// Render a sequence of operations at `depth` into a fresh string.
pub fn render_all(ops: &[Operation], depth: usize) -> String {
    let mut out = String::new();
    for op in ops {
        op.render(depth, &mut out);
    }
    out
}
