//! Control objects: message boxes, `float`, arithmetic, `trigger`, `print`,
//! `loadbang` and `bang`.

use crate::library::{ObjectLibrary, ObjectType};
use crate::message::{Atom, Message, MessageKind};
use crate::node::{Context, Instance, Object};
use crate::portlet::PortletSpec;
use crate::resolve::ArgResolver;

use super::{bang, float_arg, symbol_arg, unhandled};

pub(super) fn register(library: &mut ObjectLibrary) {
    library.register("msg", ObjectType::new(|args| Ok(MessageBox::instance(args))).raw_args());
    library.register("float", ObjectType::new(|args| Ok(Float::instance(args))));
    library.alias("f", "float");
    for op in [Op::Add, Op::Sub, Op::Mul, Op::Div] {
        library.register(op.name(), ObjectType::new(move |args| Ok(Binop::instance(op, args))));
    }
    library.register("trigger", ObjectType::new(|args| Ok(Trigger::instance(args))));
    library.alias("t", "trigger");
    library.register("print", ObjectType::new(|args| Ok(Print::instance(args))));
    library.register(
        "loadbang",
        ObjectType::new(|_| Ok(Instance::new(LoadBang).outlets([PortletSpec::MESSAGE]))),
    );
    library.register(
        "bang",
        ObjectType::new(|_| {
            Ok(Instance::new(Bang)
                .inlets([PortletSpec::MESSAGE])
                .outlets([PortletSpec::MESSAGE]))
        }),
    );
    library.alias("bng", "bang");
}

#[derive(Clone)]
enum Target {
    Outlet,
    /// `; receiver ...` lines. The receiver name may contain `$N`.
    Named(ArgResolver),
}

struct Line {
    target: Target,
    body: ArgResolver,
}

/// A message box.
///
/// Content is split into lines at `,` and `;` atoms. Lines before the first
/// `;` go out of the outlet; after a `;`, the first atom of each line names a
/// receiver. `$N` is resolved per incoming message against
/// `[0, ...incoming atoms]`. `set ...` replaces the content.
struct MessageBox {
    lines: Vec<Line>,
}

impl MessageBox {
    fn instance(args: &[Atom]) -> Instance {
        Instance::new(Self { lines: compile(args) })
            .inlets([PortletSpec::MESSAGE])
            .outlets([PortletSpec::MESSAGE])
    }
}

fn compile(content: &[Atom]) -> Vec<Line> {
    fn flush(target: &Target, current: &mut Vec<Atom>, lines: &mut Vec<Line>) {
        if !current.is_empty() {
            lines.push(Line { target: target.clone(), body: ArgResolver::compile(current) });
            current.clear();
        }
    }

    let mut lines = Vec::new();
    let mut target = Target::Outlet;
    let mut expect_receiver = false;
    let mut current = Vec::new();

    for atom in content {
        match atom.as_symbol() {
            Some(",") => flush(&target, &mut current, &mut lines),
            Some(";") => {
                flush(&target, &mut current, &mut lines);
                expect_receiver = true;
            }
            _ if expect_receiver => {
                target = Target::Named(ArgResolver::compile(core::slice::from_ref(atom)));
                expect_receiver = false;
            }
            _ => current.push(atom.clone()),
        }
    }
    flush(&target, &mut current, &mut lines);
    lines
}

impl Object for MessageBox {
    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        let incoming: Vec<Atom> = match msg.kind() {
            MessageKind::Anything("set", content) => {
                self.lines = compile(content);
                return;
            }
            MessageKind::Bang => Vec::new(),
            MessageKind::Float(v) => vec![Atom::Float(v)],
            MessageKind::Symbol(s) => vec![Atom::symbol(s)],
            MessageKind::List(atoms) => atoms.to_vec(),
            MessageKind::Anything(..) => msg.atoms.clone(),
        };
        let mut context = Vec::with_capacity(incoming.len() + 1);
        context.push(Atom::Float(0.0));
        context.extend(incoming);

        for line in &self.lines {
            let atoms = match line.body.resolve(&context) {
                Ok(atoms) => atoms,
                Err(e) => {
                    tracing::warn!(inlet, %msg, error = %e, "message box");
                    continue;
                }
            };
            match &line.target {
                Target::Outlet => ctx.out(0, atoms),
                Target::Named(receiver) => match receiver.resolve(&context) {
                    Ok(name) => ctx.send_named(&name[0].to_string(), atoms),
                    Err(e) => tracing::warn!(inlet, %msg, error = %e, "message box receiver"),
                },
            }
        }
    }
}

/// Stores a number; outputs it on bang or when set from the left.
struct Float {
    value: f64,
}

impl Float {
    fn instance(args: &[Atom]) -> Instance {
        Instance::new(Self { value: float_arg(args, 0).unwrap_or(0.0) })
            .inlets([PortletSpec::MESSAGE; 2])
            .outlets([PortletSpec::MESSAGE])
    }
}

impl Object for Float {
    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, msg.kind()) {
            (0, MessageKind::Bang) => {}
            (0, MessageKind::Float(v)) => self.value = v,
            (0, MessageKind::Anything("set", [Atom::Float(v), ..])) => {
                self.value = *v;
                return;
            }
            (1, MessageKind::Float(v)) => {
                self.value = v;
                return;
            }
            _ => return unhandled("float", inlet, msg),
        }
        ctx.out(0, vec![Atom::Float(self.value)]);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
        }
    }

    fn apply(self, left: f64, right: f64) -> f64 {
        match self {
            Op::Add => left + right,
            Op::Sub => left - right,
            Op::Mul => left * right,
            // like Pd: division by zero yields zero
            Op::Div if right == 0.0 => 0.0,
            Op::Div => left / right,
        }
    }
}

/// Arithmetic with a hot left and a cold right operand.
struct Binop {
    op: Op,
    left: f64,
    right: f64,
}

impl Binop {
    fn instance(op: Op, args: &[Atom]) -> Instance {
        Instance::new(Self { op, left: 0.0, right: float_arg(args, 0).unwrap_or(0.0) })
            .inlets([PortletSpec::MESSAGE; 2])
            .outlets([PortletSpec::MESSAGE])
    }
}

impl Object for Binop {
    fn message(&mut self, inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        match (inlet, msg.kind()) {
            (0, MessageKind::Bang) => {}
            (0, MessageKind::Float(v)) => self.left = v,
            (0, MessageKind::List([Atom::Float(l), Atom::Float(r), ..])) => {
                self.left = *l;
                self.right = *r;
            }
            (1, MessageKind::Float(v)) => {
                self.right = v;
                return;
            }
            _ => return unhandled(self.op.name(), inlet, msg),
        }
        ctx.out(0, vec![Atom::Float(self.op.apply(self.left, self.right))]);
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Slot {
    Bang,
    Float,
    Symbol,
    List,
    Anything,
    Constant(f64),
}

/// Copies its input to every outlet, right to left, converting per outlet.
struct Trigger {
    slots: Vec<Slot>,
}

impl Trigger {
    fn instance(args: &[Atom]) -> Instance {
        let mut slots: Vec<Slot> = args
            .iter()
            .map(|atom| match atom {
                Atom::Float(v) => Slot::Constant(*v),
                Atom::Symbol(s) => match s.as_str() {
                    "bang" => Slot::Bang,
                    "float" => Slot::Float,
                    "symbol" => Slot::Symbol,
                    "list" => Slot::List,
                    _ => Slot::Anything,
                },
            })
            .collect();
        if slots.is_empty() {
            slots = vec![Slot::Float, Slot::Float];
        }

        let outlets = vec![PortletSpec::MESSAGE; slots.len()];
        Instance::new(Self { slots }).inlets([PortletSpec::MESSAGE]).outlets(outlets)
    }
}

impl Object for Trigger {
    fn message(&mut self, _inlet: usize, msg: &Message, ctx: &mut Context<'_>) {
        let kind = msg.kind();
        for (outlet, slot) in self.slots.iter().enumerate().rev() {
            let atoms = match (slot, kind) {
                (Slot::Bang, _) => bang(),
                (Slot::Constant(v), _) => vec![Atom::Float(*v)],
                (Slot::Float, MessageKind::Float(v)) => vec![Atom::Float(v)],
                (Slot::Float, MessageKind::List([Atom::Float(v), ..])) => vec![Atom::Float(*v)],
                (Slot::Float, MessageKind::Bang) => vec![Atom::Float(0.0)],
                (Slot::Float, _) => {
                    unhandled("trigger", 0, msg);
                    continue;
                }
                (Slot::Symbol, MessageKind::Symbol(s)) => vec![Atom::symbol("symbol"), Atom::symbol(s)],
                (Slot::Symbol, MessageKind::Anything(selector, _)) => {
                    vec![Atom::symbol("symbol"), Atom::symbol(selector)]
                }
                (Slot::Symbol, _) => vec![Atom::symbol("symbol"), Atom::symbol("float")],
                (Slot::List, MessageKind::Bang) => vec![Atom::symbol("list")],
                (Slot::List, MessageKind::List(atoms)) => atoms.to_vec(),
                (Slot::List, _) => msg.atoms.clone(),
                (Slot::Anything, _) => msg.atoms.clone(),
            };
            ctx.out(outlet, atoms);
        }
    }
}

/// Logs every message at info level.
struct Print {
    prefix: String,
}

impl Print {
    fn instance(args: &[Atom]) -> Instance {
        let prefix = symbol_arg(args, 0).unwrap_or("print").to_owned();
        Instance::new(Self { prefix }).inlets([PortletSpec::MESSAGE])
    }
}

impl Object for Print {
    fn message(&mut self, _inlet: usize, msg: &Message, _ctx: &mut Context<'_>) {
        tracing::info!(target: "patchbay::print", time_tag = msg.time_tag, "{}: {}", self.prefix, msg);
    }
}

/// Bangs once, at the start of the first block after the runtime starts.
struct LoadBang;

impl Object for LoadBang {
    fn start(&mut self, ctx: &mut Context<'_>) {
        let now = ctx.now();
        ctx.schedule(0, now, None);
    }

    fn timeout(&mut self, _token: u32, ctx: &mut Context<'_>) {
        ctx.out(0, bang());
    }
}

/// Turns anything into a bang.
struct Bang;

impl Object for Bang {
    fn message(&mut self, _inlet: usize, _msg: &Message, ctx: &mut Context<'_>) {
        ctx.out(0, bang());
    }
}
