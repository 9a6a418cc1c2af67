//! Host-provided natives. `spec.md` names exactly one: `clock`.

use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use lox_core::{Interner, NativeFn, Object, Table, Value};

/// Registers every native function into `globals`, interning each name
/// through `pool` the same way the compiler interns identifiers.
pub fn install(globals: &mut Table<Value>, pool: &mut Interner) {
    define(globals, pool, "clock", Some(0), |_args| {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Ok(Value::Number(seconds))
    });
}

fn define<F>(globals: &mut Table<Value>, pool: &mut Interner, name: &str, arity: Option<u8>, function: F)
where
    F: Fn(&[Value]) -> Result<Value, String> + 'static,
{
    let interned = pool.intern(name);
    let native = NativeFn {
        name: interned.clone(),
        arity,
        function: Box::new(function),
    };
    globals.insert(interned, Value::Object(Object::Native(Rc::new(native))));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_registered_as_a_zero_arity_native() {
        let mut pool = Interner::new();
        let mut globals = Table::new();
        install(&mut globals, &mut pool);
        let name = pool.intern("clock");
        match globals.get(&name) {
            Some(Value::Object(Object::Native(native))) => assert_eq!(native.arity, Some(0)),
            _ => panic!("expected clock to be registered as a native function"),
        }
    }

    #[test]
    fn clock_returns_a_non_negative_number() {
        let mut pool = Interner::new();
        let mut globals = Table::new();
        install(&mut globals, &mut pool);
        let name = pool.intern("clock");
        let Some(Value::Object(Object::Native(native))) = globals.get(&name) else {
            panic!("clock not registered");
        };
        let result = (native.function)(&[]).expect("clock should not fail");
        assert!(matches!(result, Value::Number(n) if n >= 0.0));
    }
}
