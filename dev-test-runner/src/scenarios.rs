//! Built-in object graphs exercised by the `scenarios` command.
use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use json_objgraph::{
    deep_eq, Codec, Config, SerdeFallback, TextStream, TypeDescriptor, TypeRegistry, Value,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

pub fn fallback() -> SerdeFallback {
    SerdeFallback::new().register::<Complex>("complex")
}

pub struct Scenario {
    pub name: &'static str,
    pub about: &'static str,
    build: fn(&Types) -> Value,
    /// Extra identity checks on the decoded graph.
    check: fn(&Value) -> bool,
}

pub struct Report {
    pub tree: String,
    pub ok: bool,
}

pub struct Types {
    point: Arc<TypeDescriptor>,
    node: Arc<TypeDescriptor>,
    stack: Arc<TypeDescriptor>,
    env: Arc<TypeDescriptor>,
}

fn registry() -> Result<(TypeRegistry, Types)> {
    let mut registry = TypeRegistry::new();
    let point = registry.register(TypeDescriptor::object("Point"))?;
    let node = registry.register(TypeDescriptor::object("Node"))?;
    let stack = registry.register(TypeDescriptor::sequence("Stack").with_base("list"))?;
    let env = registry.register(TypeDescriptor::mapping("Env").with_base("dict"))?;
    Ok((registry, Types { point, node, stack, env }))
}

impl Scenario {
    pub fn run(&self, config: Config) -> Result<Report> {
        let (registry, types) = registry()?;
        let codec = Codec::new(registry).with_config(config).with_fallback(fallback());
        let value = (self.build)(&types);
        let tree = codec.to_string(&value)?;
        let back = codec.from_str(&tree)?;
        let stable = codec.to_string(&back)? == tree;
        tracing::debug!(scenario = self.name, stable, "decoded");
        Ok(Report { ok: stable && deep_eq(&back, &value) && (self.check)(&back), tree })
    }
}

pub fn all() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "a",
            about: "scalars only",
            build: |_| Value::list([Value::from(1), Value::from("a"), Value::from(1)]),
            check: |_| true,
        },
        Scenario {
            name: "b",
            about: "shared mapping",
            build: |_| {
                let m = Value::map([(Value::from("field"), Value::from(1))]);
                Value::list([m.clone(), m])
            },
            check: |v| items(v).is_some_and(|items| items[0].is(&items[1])),
        },
        Scenario {
            name: "c",
            about: "self-referencing object",
            build: |t| {
                let x = Value::from(t.node.allocate().with("label", "x"));
                set_attr(&x, "next", x.clone());
                x
            },
            check: |v| attr(v, "next").is_some_and(|next| next.is(v)),
        },
        Scenario {
            name: "d",
            about: "set of scalars",
            build: |_| Value::set([Value::from(1), Value::from(2), Value::from(3)]),
            check: |v| v.as_obj().is_some_and(|obj| obj.borrow().as_set().is_some_and(|s| s.len() == 3)),
        },
        Scenario {
            name: "e",
            about: "opaque value through the fallback",
            build: |t| {
                let p = t.point.allocate().with("x", 1).with("y", 2);
                Value::list([Value::from(p), Value::opaque(Complex { re: 1.0, im: 2.0 })])
            },
            check: |_| true,
        },
        Scenario {
            name: "cycle",
            about: "sequence containing itself",
            build: |_| {
                let l = Value::list([Value::from(1)]);
                if let Some(obj) = l.as_obj() {
                    let mut inner = obj.borrow_mut();
                    if let Some(items) = inner.as_list_mut() {
                        items.push(l.clone());
                    }
                }
                l
            },
            check: |v| items(v).is_some_and(|items| items[1].is(v)),
        },
        Scenario {
            name: "streams",
            about: "text and byte streams keep content and cursor",
            build: |_| {
                let mut bytes = Cursor::new(b"\x00\x01\xff".to_vec());
                bytes.set_position(2);
                let text = TextStream::with_cursor("hello", 3).unwrap_or_else(|_| TextStream::new("hello"));
                Value::tuple([Value::text_stream(text), Value::byte_stream(bytes)])
            },
            check: |_| true,
        },
        Scenario {
            name: "subtypes",
            about: "sequence and mapping subtypes with attributes",
            build: |t| {
                let mut stack = t.stack.allocate().with("limit", 8);
                if let Some(items) = stack.items_mut() {
                    items.extend([Value::from("bottom"), Value::from("top")]);
                }
                let env = t.env.allocate().with("HOME", "/root").with("SHELL", "/bin/sh");
                Value::map([(Value::from("stack"), Value::from(stack)), (Value::from("env"), Value::from(env))])
            },
            check: |_| true,
        },
    ]
}

fn items(v: &Value) -> Option<Vec<Value>> {
    v.as_obj()?.borrow().as_list().cloned()
}

fn attr(v: &Value, name: &str) -> Option<Value> {
    v.as_obj()?.borrow().as_instance()?.get(name).cloned()
}

fn set_attr(v: &Value, name: &str, value: Value) {
    if let Some(obj) = v.as_obj() {
        if let Some(instance) = obj.borrow_mut().as_instance_mut() {
            instance.set(name, value);
        }
    }
}
