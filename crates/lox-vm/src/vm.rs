//! The stack machine: a value stack, a call-frame stack, the open-upvalue
//! list, globals, and the opcode dispatch loop.

use std::cell::RefCell;
use std::rc::Rc;

use lox_core::{
    BoundMethod, Class, Closure, Instance, Interner, LoxStr, Object, OpCode, Table, Upvalue,
    UpvalueState, Value,
};
use lox_compiler::CompileError;

use crate::natives;

const MAX_FRAMES: usize = 64;

/// What went wrong compiling or running a program. Both variants carry
/// everything the CLI needs to choose an exit code and print diagnostics.
#[derive(Debug)]
pub enum InterpretError {
    Compile(Vec<CompileError>),
    Runtime(String),
}

struct CallFrame {
    closure: Rc<Closure>,
    ip: usize,
    offset: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    open_upvalues: Option<Rc<Upvalue>>,
    globals: Table<Value>,
    pool: Interner,
    init_string: Rc<LoxStr>,
}

impl Vm {
    pub fn new() -> Self {
        let mut pool = Interner::new();
        let init_string = pool.intern("init");
        let mut globals = Table::new();
        natives::install(&mut globals, &mut pool);
        Vm {
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: None,
            globals,
            pool,
            init_string,
        }
    }

    /// Compiles and runs one program. Globals, the string pool, and
    /// natives persist across calls so a REPL can reuse one `Vm` across
    /// lines; the value stack, frame stack, and open-upvalue list are
    /// always empty again on return, whether this call succeeded or a
    /// runtime error reset them.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function =
            lox_compiler::compile(source, &mut self.pool).map_err(InterpretError::Compile)?;
        let closure = Rc::new(Closure {
            function: Rc::new(function),
            upvalues: Vec::new(),
        });
        self.stack.push(Value::Object(Object::Closure(closure.clone())));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            offset: 0,
        });
        self.run()
    }

    // ---- stack helpers --------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("value stack underflow: compiler emitted unbalanced bytecode")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.closure.function.chunk.read_byte(frame.ip);
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frame_mut();
        let value = frame.closure.function.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        self.frame().closure.function.chunk.constants[idx as usize].clone()
    }

    fn read_string(&mut self) -> Rc<LoxStr> {
        match self.read_constant() {
            Value::Object(Object::String(s)) => s,
            _ => unreachable!("compiler only ever emits string constants for name operands"),
        }
    }

    // ---- upvalues ---------------------------------------------------

    fn capture_upvalue(&mut self, stack_index: usize) -> Rc<Upvalue> {
        let mut prev: Option<Rc<Upvalue>> = None;
        let mut cursor = self.open_upvalues.clone();
        while let Some(up) = cursor.clone() {
            match up.open_index() {
                Some(idx) if idx > stack_index => {
                    prev = Some(up.clone());
                    cursor = up.next.borrow().clone();
                }
                Some(idx) if idx == stack_index => return up,
                _ => break,
            }
        }

        let created = Upvalue::new_open(stack_index);
        *created.next.borrow_mut() = cursor;
        match &prev {
            Some(p) => *p.next.borrow_mut() = Some(created.clone()),
            None => self.open_upvalues = Some(created.clone()),
        }
        created
    }

    fn close_upvalues(&mut self, last_index: usize) {
        loop {
            let head = match &self.open_upvalues {
                Some(up) => up.clone(),
                None => return,
            };
            let index = match head.open_index() {
                Some(idx) if idx >= last_index => idx,
                _ => return,
            };
            let value = self.stack[index].clone();
            *head.state.borrow_mut() = UpvalueState::Closed(value);
            self.open_upvalues = head.next.borrow_mut().take();
        }
    }

    // ---- calling ------------------------------------------------------

    fn call(&mut self, closure: Rc<Closure>, arg_count: u8) -> Result<(), InterpretError> {
        let arity = closure.function.arity;
        if arg_count != arity {
            return Err(self.runtime_error(&format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(self.runtime_error("Stack overflow."));
        }
        let offset = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            offset,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), InterpretError> {
        match callee {
            Value::Object(Object::Closure(closure)) => self.call(closure, arg_count),
            Value::Object(Object::BoundMethod(bound)) => {
                let receiver_slot = self.stack.len() - arg_count as usize - 1;
                self.stack[receiver_slot] = bound.receiver.clone();
                self.call(bound.method.clone(), arg_count)
            }
            Value::Object(Object::Class(class)) => {
                let instance = Value::Object(Object::Instance(Rc::new(RefCell::new(
                    Instance::new(class.clone()),
                ))));
                let receiver_slot = self.stack.len() - arg_count as usize - 1;
                self.stack[receiver_slot] = instance;
                let initializer = class.borrow().methods.get(&self.init_string).cloned();
                match initializer {
                    Some(Value::Object(Object::Closure(init))) => self.call(init, arg_count),
                    Some(_) => unreachable!("methods table only ever stores closures"),
                    None if arg_count == 0 => Ok(()),
                    None => Err(self.runtime_error(&format!(
                        "Expected 0 arguments but got {arg_count}."
                    ))),
                }
            }
            Value::Object(Object::Native(native)) => {
                if let Some(arity) = native.arity {
                    if arg_count != arity {
                        return Err(self.runtime_error(&format!(
                            "Expected {arity} arguments but got {arg_count}."
                        )));
                    }
                }
                let start = self.stack.len() - arg_count as usize;
                let args: Vec<Value> = self.stack[start..].to_vec();
                let result = (native.function)(&args).map_err(|msg| self.runtime_error(&msg))?;
                self.stack.truncate(start - 1);
                self.push(result);
                Ok(())
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn bind_method(&mut self, class: &Rc<RefCell<Class>>, name: &Rc<LoxStr>) -> Result<(), InterpretError> {
        let method = class.borrow().methods.get(name).cloned();
        let closure = match method {
            Some(Value::Object(Object::Closure(c))) => c,
            Some(_) => unreachable!("methods table only ever stores closures"),
            None => {
                return Err(self.runtime_error(&format!("Undefined property '{}'.", name.as_str())));
            }
        };
        let receiver = self.pop();
        self.push(Value::Object(Object::BoundMethod(Rc::new(BoundMethod {
            receiver,
            method: closure,
        }))));
        Ok(())
    }

    fn invoke_from_class(
        &mut self,
        class: &Rc<RefCell<Class>>,
        name: &Rc<LoxStr>,
        arg_count: u8,
    ) -> Result<(), InterpretError> {
        let method = class.borrow().methods.get(name).cloned();
        match method {
            Some(Value::Object(Object::Closure(closure))) => self.call(closure, arg_count),
            Some(_) => unreachable!("methods table only ever stores closures"),
            None => Err(self.runtime_error(&format!("Undefined property '{}'.", name.as_str()))),
        }
    }

    fn invoke(&mut self, name: &Rc<LoxStr>, arg_count: u8) -> Result<(), InterpretError> {
        let receiver = self.peek(arg_count as usize).clone();
        let instance = match &receiver {
            Value::Object(Object::Instance(instance)) => instance.clone(),
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };
        if let Some(field) = instance.borrow().fields.get(name).cloned() {
            let receiver_slot = self.stack.len() - arg_count as usize - 1;
            self.stack[receiver_slot] = field.clone();
            return self.call_value(field, arg_count);
        }
        let class = instance.borrow().class.clone();
        self.invoke_from_class(&class, name, arg_count)
    }

    // ---- errors -----------------------------------------------------

    fn runtime_error(&mut self, message: &str) -> InterpretError {
        let mut report = String::from(message);
        for frame in self.frames.iter().rev() {
            let line = frame.closure.function.chunk.line_at(frame.ip.saturating_sub(1));
            report.push('\n');
            match &frame.closure.function.name {
                Some(name) => report.push_str(&format!("[line {line}] in {}()", name.as_str())),
                None => report.push_str(&format!("[line {line}] in script")),
            }
        }
        eprintln!("{report}");
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues = None;
        InterpretError::Runtime(message.to_string())
    }

    // ---- dispatch loop ------------------------------------------------

    fn run(&mut self) -> Result<(), InterpretError> {
        loop {
            let op = OpCode::from_byte(self.read_byte());
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let offset = self.frame().offset;
                    self.push(self.stack[offset + slot].clone());
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let offset = self.frame().offset;
                    self.stack[offset + slot] = self.peek(0).clone();
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(&name) {
                        Some(value) => {
                            let value = value.clone();
                            self.push(value);
                        }
                        None => {
                            return Err(self.runtime_error(&format!(
                                "Undefined variable '{}'.",
                                name.as_str()
                            )));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.pop();
                    self.globals.insert(name, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    if self.globals.get(&name).is_none() {
                        return Err(self.runtime_error(&format!(
                            "Undefined variable '{}'.",
                            name.as_str()
                        )));
                    }
                    self.globals.insert(name, self.peek(0).clone());
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.frame().closure.upvalues[slot].clone();
                    let value = match &*upvalue.state.borrow() {
                        UpvalueState::Open(idx) => self.stack[*idx].clone(),
                        UpvalueState::Closed(value) => value.clone(),
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.frame().closure.upvalues[slot].clone();
                    let value = self.peek(0).clone();
                    let mut state = upvalue.state.borrow_mut();
                    match &mut *state {
                        UpvalueState::Open(idx) => self.stack[*idx] = value,
                        UpvalueState::Closed(slot) => *slot = value,
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let instance = match self.peek(0) {
                        Value::Object(Object::Instance(i)) => i.clone(),
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    if let Some(value) = instance.borrow().fields.get(&name).cloned() {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = instance.borrow().class.clone();
                        self.bind_method(&class, &name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let instance = match self.peek(1) {
                        Value::Object(Object::Instance(i)) => i.clone(),
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let value = self.peek(0).clone();
                    instance.borrow_mut().fields.insert(name, value.clone());
                    self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = match self.pop() {
                        Value::Object(Object::Class(c)) => c,
                        _ => unreachable!("compiler only loads classes as superclasses"),
                    };
                    self.bind_method(&superclass, &name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.numeric_binary(|a, b| Value::Bool(a > b))?,
                OpCode::Less => self.numeric_binary(|a, b| Value::Bool(a < b))?,
                OpCode::Add => {
                    let b = self.peek(0).clone();
                    let a = self.peek(1).clone();
                    match (&a, &b) {
                        (Value::Object(Object::String(a)), Value::Object(Object::String(b))) => {
                            self.pop();
                            self.pop();
                            let mut joined = a.as_str().to_string();
                            joined.push_str(b.as_str());
                            let interned = self.pool.intern(&joined);
                            self.push(Value::Object(Object::String(interned)));
                        }
                        (Value::Number(a), Value::Number(b)) => {
                            let sum = a + b;
                            self.pop();
                            self.pop();
                            self.push(Value::Number(sum));
                        }
                        _ => {
                            return Err(self
                                .runtime_error("Operands must be two numbers or two strings."));
                        }
                    }
                }
                OpCode::Subtract => self.numeric_binary(|a, b| Value::Number(a - b))?,
                OpCode::Multiply => self.numeric_binary(|a, b| Value::Number(a * b))?,
                OpCode::Divide => self.numeric_binary(|a, b| Value::Number(a / b))?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => match self.peek(0).as_number() {
                    Some(n) => {
                        self.pop();
                        self.push(Value::Number(-n));
                    }
                    None => return Err(self.runtime_error("Operand must be a number.")),
                },
                OpCode::Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frame_mut().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frame_mut().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize).clone();
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    self.invoke(&name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    let superclass = match self.pop() {
                        Value::Object(Object::Class(c)) => c,
                        _ => unreachable!("compiler only loads classes as superclasses"),
                    };
                    self.invoke_from_class(&superclass, &name, arg_count)?;
                }
                OpCode::Closure => {
                    let function = match self.read_constant() {
                        Value::Object(Object::Function(f)) => f,
                        _ => unreachable!("CLOSURE operand is always a function constant"),
                    };
                    let mut upvalues = Vec::with_capacity(function.upvalue_count as usize);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let offset = self.frame().offset;
                            self.capture_upvalue(offset + index)
                        } else {
                            self.frame().closure.upvalues[index].clone()
                        };
                        upvalues.push(upvalue);
                    }
                    self.push(Value::Object(Object::Closure(Rc::new(Closure {
                        function,
                        upvalues,
                    }))));
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let offset = self.frame().offset;
                    self.close_upvalues(offset);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(offset);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    self.push(Value::Object(Object::Class(Rc::new(RefCell::new(
                        Class::new(name),
                    )))));
                }
                OpCode::Inherit => {
                    let superclass = match self.peek(1) {
                        Value::Object(Object::Class(c)) => c.clone(),
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let subclass = match self.peek(0) {
                        Value::Object(Object::Class(c)) => c.clone(),
                        _ => unreachable!("compiler only emits INHERIT with a class on top"),
                    };
                    let super_ref = superclass.borrow();
                    subclass.borrow_mut().methods.add_all_from(&super_ref.methods);
                    drop(super_ref);
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0).clone();
                    let class = match self.peek(1) {
                        Value::Object(Object::Class(c)) => c.clone(),
                        _ => unreachable!("compiler only emits METHOD with a class beneath it"),
                    };
                    class.borrow_mut().methods.insert(name, method);
                    self.pop();
                }
            }
        }
    }

    fn numeric_binary<F: Fn(f64, f64) -> Value>(&mut self, op: F) -> Result<(), InterpretError> {
        let b = self.peek(0).as_number();
        let a = self.peek(1).as_number();
        match (a, b) {
            (Some(a), Some(b)) => {
                self.pop();
                self.pop();
                self.push(op(a, b));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Vm {
        let mut vm = Vm::new();
        vm.interpret(source).expect("expected successful run");
        vm
    }

    #[test]
    fn closures_share_and_mutate_a_captured_upvalue() {
        let source = "fun mk(){ var i=0; fun inc(){ i=i+1; return i; } return inc; } \
                      var c=mk(); var a=c(); var b=c();";
        let mut vm = run(source);
        let a_name = vm.pool.intern("a");
        let b_name = vm.pool.intern("b");
        let a = vm.globals.get(&a_name).cloned();
        let b = vm.globals.get(&b_name).cloned();
        assert_eq!(a.and_then(|v| v.as_number()), Some(1.0));
        assert_eq!(b.and_then(|v| v.as_number()), Some(2.0));
    }

    #[test]
    fn vm_stacks_are_empty_after_a_successful_run() {
        let vm = run("print 1 + 1;");
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
        assert!(vm.open_upvalues.is_none());
    }

    #[test]
    fn vm_state_is_reset_after_a_runtime_error() {
        let mut vm = Vm::new();
        let err = vm.interpret("1 + \"a\";");
        assert!(matches!(err, Err(InterpretError::Runtime(_))));
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
        assert!(vm.open_upvalues.is_none());
    }

    #[test]
    fn undefined_global_read_is_a_runtime_error() {
        let mut vm = Vm::new();
        let err = vm.interpret("print nope;");
        assert!(matches!(err, Err(InterpretError::Runtime(_))));
    }

    #[test]
    fn capture_upvalue_reuses_an_existing_open_upvalue_at_the_same_slot() {
        let mut vm = Vm::new();
        vm.stack.push(Value::Number(1.0));
        let first = vm.capture_upvalue(0);
        let second = vm.capture_upvalue(0);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn open_upvalue_list_stays_descending_as_slots_are_captured() {
        let mut vm = Vm::new();
        vm.stack.push(Value::Number(1.0));
        vm.stack.push(Value::Number(2.0));
        vm.stack.push(Value::Number(3.0));
        vm.capture_upvalue(0);
        vm.capture_upvalue(2);
        vm.capture_upvalue(1);

        let mut indices = Vec::new();
        let mut cursor = vm.open_upvalues.clone();
        while let Some(up) = cursor {
            indices.push(up.open_index().unwrap());
            cursor = up.next.borrow().clone();
        }
        let mut sorted = indices.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(indices, sorted, "open upvalue list must stay descending");
    }

    #[test]
    fn closing_upvalues_detaches_them_from_the_open_list() {
        let mut vm = Vm::new();
        vm.stack.push(Value::Number(10.0));
        vm.stack.push(Value::Number(20.0));
        let low = vm.capture_upvalue(0);
        let high = vm.capture_upvalue(1);

        vm.close_upvalues(1);

        assert!(high.open_index().is_none(), "slot >= last_index should be closed");
        assert!(low.open_index().is_some(), "slot below last_index stays open");
        assert!(vm.open_upvalues.is_some());
    }

    #[test]
    fn strict_equality_never_matches_across_kinds() {
        assert_ne!(Value::Nil, Value::Bool(false));
        assert_ne!(Value::Number(0.0), Value::Bool(false));
        assert_eq!(Value::Number(1.0), Value::Number(1.0));
    }
}
