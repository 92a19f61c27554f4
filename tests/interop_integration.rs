//! Integration tests for the interop facade and collection proxies.
//!
//! These run against an in-process host, so they exercise the whole stack
//! (facade, codec, channel worker, execution loop) without a socket.
//!
//! # Running
//!
//! ```bash
//! cargo test --test interop_integration -- --nocapture
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use hostbridge::codec::{Request, Response};
use hostbridge::host::{
    CallArgs, Graph, Host, Invocation, LocalTransport, Method, Node, Param, RemoteCollection,
    RemoteObject,
};
use hostbridge::{
    interop, remote_class, remote_enum, Accessor, Args, BridgeError, Channel, ChannelError, Kind,
    Marshal, Matrix, RemoteClass, RemoteFault, Result, SpecializedCollection, Transport, Value,
};

remote_class! {
    struct Document => "Document";
    struct Layer => "Layer";
}

remote_enum! {
    enum Blend {
        Normal => "Normal",
        Multiply => "Multiply",
        Screen => "Screen",
    }
}

impl Document {
    fn layers(&self) -> Result<SpecializedCollection<Layer>> {
        interop::get(self.channel(), &self.member("layers"))
    }

    fn title(&self) -> Result<String> {
        interop::get_str(self.channel(), &self.member("title"))
    }
}

impl Layer {
    fn name(&self) -> Result<String> {
        interop::get_str(self.channel(), &self.member("name"))
    }

    fn opacity(&self) -> Result<f64> {
        interop::get_float(self.channel(), &self.member("opacity"))
    }

    fn blend(&self) -> Result<Blend> {
        interop::get(self.channel(), &self.member("blend"))
    }

    fn set_blend(&self, blend: Blend) -> Result<()> {
        interop::set(self.channel(), &self.member("blend"), blend)
    }
}

fn layer(name: &str, opacity: f64) -> RemoteObject {
    RemoteObject::new("Layer")
        .with_value("name", Kind::Str, Value::Str(name.into()))
        .with_value("opacity", Kind::Float, Value::Float(opacity))
        .with_value("blend", Blend::kind(), Value::Enum("Normal".into()))
}

fn document() -> RemoteObject {
    let layers = RemoteCollection::structural("Layer", |args: &CallArgs| {
        Ok(Node::Object(layer(
            args.str("name").unwrap_or("Layer"),
            args.float("opacity").unwrap_or(1.0),
        )))
    })
    .constructor_param(Param::optional("name", Kind::Str))
    .constructor_param(Param::optional("opacity", Kind::Float))
    .with_item(layer("Background", 1.0))
    .with_item(layer("Ink", 0.8))
    .with_item(layer("Notes", 0.5));

    RemoteObject::new("Document")
        .with_value("title", Kind::Str, Value::Str("untitled".into()))
        .with_value("count", Kind::Int, Value::Int(0))
        .with_value("ratio", Kind::Float, Value::Float(0.0))
        .with_value("visible", Kind::Bool, Value::Bool(false))
        .with_value("tags", Kind::vec(Kind::Str), Value::Array(vec![]))
        .with_value(
            "origin",
            Kind::array(Kind::Float, 3),
            Value::Array(vec![Value::Float(0.0); 3]),
        )
        .with_value(
            "grid",
            Kind::array(Kind::array(Kind::Int, 2), 2),
            Value::Array(vec![Value::Array(vec![Value::Int(0); 2]); 2]),
        )
        .with_value(
            "transform",
            Kind::matrix(Kind::Float, &[2, 3]),
            Value::Matrix {
                dims: vec![2, 3],
                items: vec![Value::Float(0.0); 6],
            },
        )
        .with("layers", layers)
        .with_method(
            "touch",
            Method::new(Kind::Void, |_: &mut RemoteObject, _: &Invocation| {
                Ok(Some(Value::Int(99)))
            }),
        )
        .with_method(
            "flatten",
            Method::new(Kind::Void, |doc: &mut RemoteObject, _: &Invocation| {
                if let Some(layers) = doc.collection_mut("layers") {
                    while layers.len() > 1 {
                        layers.remove(layers.len() - 1);
                    }
                }
                Ok(None)
            }),
        )
        .with_method(
            "fail",
            Method::new(Kind::Void, |_: &mut RemoteObject, _: &Invocation| {
                Err(RemoteFault::remote("disk full"))
            }),
        )
        .with_method(
            "describe",
            Method::new(Kind::Str, |doc: &mut RemoteObject, inv: &Invocation| {
                let prefix = inv.args.str("prefix").unwrap_or("doc");
                let title = match doc.value_of("title") {
                    Some(Value::Str(title)) => title.clone(),
                    _ => String::new(),
                };
                Ok(Some(Value::Str(format!("{}:{}", prefix, title))))
            })
            .optional("prefix", Kind::Str),
        )
        .with_method(
            "add",
            Method::new(Kind::Int, |_: &mut RemoteObject, inv: &Invocation| {
                let sum = inv.args.int("a").unwrap_or(0) + inv.args.int("b").unwrap_or(0);
                Ok(Some(Value::Int(sum)))
            })
            .param("a", Kind::Int)
            .param("b", Kind::Int),
        )
        .with_method(
            "top_layer",
            Method::new(Kind::object("Layer"), |_: &mut RemoteObject, inv: &Invocation| {
                Ok(Some(Value::Object {
                    type_tag: "Layer".into(),
                    accessor: inv.this.member("layers").index(0),
                }))
            }),
        )
        .with_method(
            "mode",
            Method::new(Blend::kind(), |_: &mut RemoteObject, _: &Invocation| {
                Ok(Some(Value::Enum("Screen".into())))
            }),
        )
        .with_method(
            "broken",
            Method::new(Kind::Int, |_: &mut RemoteObject, _: &Invocation| Ok(None)),
        )
}

fn graph() -> Graph {
    let mut graph = Graph::new().with_root("doc", document());
    for i in 0..4 {
        graph.insert_root(&format!("slot{}", i), Node::value(Kind::Int, Value::Int(-1)));
    }
    graph
}

fn channel() -> Channel {
    Channel::in_process(Host::new(graph()), Duration::from_secs(5)).expect("channel")
}

fn doc(channel: &Channel) -> Document {
    interop::get_class(channel, &Accessor::root("doc")).expect("doc")
}

/// Counts requests that actually reach the host.
struct CountingTransport {
    inner: LocalTransport,
    count: Arc<AtomicUsize>,
}

impl Transport for CountingTransport {
    fn exchange(&mut self, request: &Request) -> std::result::Result<Response, ChannelError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.exchange(request)
    }
}

fn counting_channel() -> (Channel, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let transport = CountingTransport {
        inner: LocalTransport::new(Host::new(graph())),
        count: Arc::clone(&count),
    };
    (
        Channel::spawn(transport, Duration::from_secs(5)).expect("channel"),
        count,
    )
}

// =============================================================================
// Scalars
// =============================================================================

#[test]
fn test_int_round_trip_at_boundaries() {
    let ch = channel();
    let acc = doc(&ch).member("count");
    for v in [0, 1, -1, i64::MIN, i64::MAX] {
        interop::set_int(&ch, &acc, v).unwrap();
        assert_eq!(interop::get_int(&ch, &acc).unwrap(), v);
    }
}

#[test]
fn test_float_round_trip_at_boundaries() {
    let ch = channel();
    let acc = doc(&ch).member("ratio");
    for v in [
        0.0,
        -0.0,
        f64::MIN,
        f64::MAX,
        f64::MIN_POSITIVE,
        f64::EPSILON,
        5e-324,
        0.1,
        f64::INFINITY,
        f64::NEG_INFINITY,
    ] {
        interop::set_float(&ch, &acc, v).unwrap();
        let got = interop::get_float(&ch, &acc).unwrap();
        assert_eq!(got.to_bits(), v.to_bits(), "{} came back as {}", v, got);
    }

    interop::set_float(&ch, &acc, f64::NAN).unwrap();
    assert!(interop::get_float(&ch, &acc).unwrap().is_nan());
}

#[test]
fn test_str_and_bool_round_trip() {
    let ch = channel();
    let d = doc(&ch);
    for v in ["", "plain", "quote \" backslash \\ newline \n", "日本語 ✓"] {
        interop::set_str(&ch, &d.member("title"), v).unwrap();
        assert_eq!(d.title().unwrap(), v);
    }
    for v in [true, false] {
        interop::set_bool(&ch, &d.member("visible"), v).unwrap();
        assert_eq!(interop::get_bool(&ch, &d.member("visible")).unwrap(), v);
    }
}

#[test]
fn test_no_coercion_between_kinds() {
    let ch = channel();
    let d = doc(&ch);

    // Int property read as float.
    let err = interop::get_float(&ch, &d.member("count")).unwrap_err();
    assert!(err.is_type_mismatch(), "{:?}", err);

    // Str property assigned an int: rejected by the host.
    let err = interop::set_int(&ch, &d.member("title"), 3).unwrap_err();
    assert!(err.is_type_mismatch(), "{:?}", err);
}

// =============================================================================
// Arrays and matrices
// =============================================================================

#[test]
fn test_variable_array_round_trip() {
    let ch = channel();
    let acc = doc(&ch).member("tags");

    assert_eq!(interop::get_vec::<String>(&ch, &acc).unwrap(), Vec::<String>::new());

    let tags = vec!["a".to_string(), String::new(), "c".to_string()];
    interop::set_vec(&ch, &acc, tags.clone()).unwrap();
    assert_eq!(interop::get_vec::<String>(&ch, &acc).unwrap(), tags);
}

#[test]
fn test_fixed_arrays_keep_their_shape() {
    let ch = channel();
    let d = doc(&ch);

    let origin: [f64; 3] = interop::get_array(&ch, &d.member("origin")).unwrap();
    assert_eq!(origin, [0.0; 3]);

    interop::set_array(&ch, &d.member("origin"), [1.5, -2.0, 3.25]).unwrap();
    assert_eq!(
        interop::get_array::<f64, 3>(&ch, &d.member("origin")).unwrap(),
        [1.5, -2.0, 3.25]
    );

    interop::set_array(&ch, &d.member("grid"), [[1i64, 2], [3, 4]]).unwrap();
    let grid: [[i64; 2]; 2] = interop::get_array(&ch, &d.member("grid")).unwrap();
    assert_eq!(grid, [[1, 2], [3, 4]]);

    // Element access into an array value.
    assert_eq!(
        interop::get_int(&ch, &d.member("grid").index(1).index(0)).unwrap(),
        3
    );

    // Declared length disagrees with the remote array.
    let err = interop::get_array::<f64, 4>(&ch, &d.member("origin")).unwrap_err();
    assert!(err.is_type_mismatch());
}

#[test]
fn test_matrix_shape() {
    let ch = channel();
    let acc = doc(&ch).member("transform");

    let zero: Matrix<f64> = interop::get_matrix(&ch, &acc, &[2, 3]).unwrap();
    assert_eq!(zero.dims(), &[2, 3]);
    assert_eq!(zero.items().len(), 6);

    let m = Matrix::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    interop::set_matrix(&ch, &acc, &[2, 3], m.clone()).unwrap();
    let got: Matrix<f64> = interop::get_matrix(&ch, &acc, &[2, 3]).unwrap();
    assert_eq!(got, m);
    assert_eq!(got.get(&[1, 0]), Some(&4.0));

    let err = interop::get_matrix::<f64>(&ch, &acc, &[3, 2]).unwrap_err();
    assert!(err.is_type_mismatch());
}

#[test]
fn test_matrix_with_wrong_dims_is_rejected_before_sending() {
    let (ch, count) = counting_channel();
    let acc = Accessor::root("doc").member("transform");
    let m = Matrix::new(vec![3, 2], vec![0.0; 6]).unwrap();

    let err = interop::set_matrix(&ch, &acc, &[2, 3], m).unwrap_err();
    assert!(err.is_type_mismatch());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Enums
// =============================================================================

#[test]
fn test_enum_round_trip_by_tag_and_type() {
    let ch = channel();
    let ink: Layer = interop::get_class(&ch, &Accessor::root("doc").member("layers").index(1)).unwrap();

    interop::set_enum(&ch, &ink.member("blend"), Blend::VARIANTS, "Multiply").unwrap();
    assert_eq!(
        interop::get_enum(&ch, &ink.member("blend"), Blend::VARIANTS).unwrap(),
        "Multiply"
    );

    ink.set_blend(Blend::Screen).unwrap();
    assert_eq!(ink.blend().unwrap(), Blend::Screen);
}

#[test]
fn test_enum_outside_variant_set_fails_before_any_request() {
    let (ch, count) = counting_channel();
    let acc = Accessor::root("doc").member("layers").index(0).member("blend");

    let err = interop::set_enum(&ch, &acc, Blend::VARIANTS, "Overlay").unwrap_err();
    match err {
        BridgeError::TypeMismatch { found, .. } => assert_eq!(found, "unknown variant `Overlay`"),
        other => panic!("Expected TypeMismatch, got {:?}", other),
    }
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // A narrower declared set rejects tags the remote would accept.
    let err = interop::get_enum(&ch, &acc, &["Multiply"]).unwrap_err();
    assert!(err.is_type_mismatch());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_call_enum() {
    let ch = channel();
    let d = doc(&ch);
    let mode = interop::call_enum(&ch, &d.member("mode"), Args::new(), Blend::VARIANTS).unwrap();
    assert_eq!(mode, "Screen");
    let typed: Blend = interop::call(&ch, &d.member("mode"), Args::new()).unwrap();
    assert_eq!(typed, Blend::Screen);
}

// =============================================================================
// Objects and calls
// =============================================================================

#[test]
fn test_object_identity_is_by_path() {
    let ch = channel();
    let acc = Accessor::root("doc").member("layers").index(2);
    let a: Layer = interop::get_class(&ch, &acc).unwrap();
    let b: Layer = interop::get_class(&ch, &acc).unwrap();

    assert_eq!(a.accessor(), b.accessor());
    assert_eq!(a.accessor().as_str(), "doc.layers[2]");
    assert_eq!(a.name().unwrap(), "Notes");
}

#[test]
fn test_wrong_class_is_type_mismatch() {
    let ch = channel();
    let err = interop::get_class::<Document>(&ch, &Accessor::root("doc").member("layers").index(0))
        .unwrap_err();
    assert!(err.is_type_mismatch());
}

#[test]
fn test_call_class_binds_returned_reference() {
    let ch = channel();
    let d = doc(&ch);
    let top: Layer = interop::call_class(&ch, &d.member("top_layer"), Args::new()).unwrap();
    assert_eq!(top.accessor().as_str(), "doc.layers[0]");
    assert_eq!(top.opacity().unwrap(), 1.0);
}

#[test]
fn test_void_call_ignores_returned_marker() {
    let ch = channel();
    let d = doc(&ch);

    // Returns the callee's "no value" marker.
    interop::call_void(&ch, &d.member("flatten"), Args::new()).unwrap();
    assert_eq!(d.layers().unwrap().len().unwrap(), 1);

    // Declared void but the callee hands back a value anyway.
    interop::call_void(&ch, &d.member("touch"), Args::new()).unwrap();
    let raw = interop::call_value(&ch, &d.member("touch"), Args::new(), &Kind::Void).unwrap();
    assert_eq!(raw, Value::Void);
}

#[test]
fn test_positional_named_and_optional_arguments() {
    let ch = channel();
    let d = doc(&ch);

    let sum = interop::call_int(&ch, &d.member("add"), Args::new().arg(2i64).named("b", 40i64));
    assert_eq!(sum.unwrap(), 42);

    let defaulted = interop::call_str(
        &ch,
        &d.member("describe"),
        Args::new().named_opt::<String>("prefix", None),
    );
    assert_eq!(defaulted.unwrap(), "doc:untitled");

    let prefixed = interop::call_str(&ch, &d.member("describe"), Args::new().arg("t".to_string()));
    assert_eq!(prefixed.unwrap(), "t:untitled");

    let err = interop::call_int(&ch, &d.member("add"), Args::new().arg(1i64)).unwrap_err();
    assert!(matches!(err, BridgeError::Remote { .. }), "{:?}", err);

    let err = interop::call_int(&ch, &d.member("add"), Args::new().arg(1.0).arg(2i64)).unwrap_err();
    assert!(err.is_type_mismatch(), "{:?}", err);
}

#[test]
fn test_remote_failures_are_forwarded() {
    let ch = channel();
    let d = doc(&ch);

    match interop::call_void(&ch, &d.member("fail"), Args::new()).unwrap_err() {
        BridgeError::Remote { message } => assert_eq!(message, "disk full"),
        other => panic!("Expected Remote, got {:?}", other),
    }

    // Declared int, returned nothing.
    let err = interop::call_int(&ch, &d.member("broken"), Args::new()).unwrap_err();
    assert!(matches!(err, BridgeError::Remote { .. }));

    // The channel is still usable.
    assert_eq!(d.title().unwrap(), "untitled");
}

// =============================================================================
// Ordering and lifecycle
// =============================================================================

#[test]
fn test_set_then_get_observed_across_threads() {
    let ch = channel();
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ch = ch.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let acc = Accessor::root(&format!("slot{}", t));
                barrier.wait();
                for i in 0..25 {
                    interop::set_int(&ch, &acc, i).unwrap();
                    assert_eq!(interop::get_int(&ch, &acc).unwrap(), i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        let acc = Accessor::root(&format!("slot{}", t));
        assert_eq!(interop::get_int(&ch, &acc).unwrap(), 24);
    }
}

#[test]
fn test_close_fails_calls_instead_of_hanging() {
    let ch = channel();
    let d = doc(&ch);
    ch.close();

    match d.title().unwrap_err() {
        BridgeError::Channel(ChannelError::Closed) => {}
        other => panic!("Expected Closed, got {:?}", other),
    }
}

// =============================================================================
// Collections
// =============================================================================

#[test]
fn test_collection_scenario() {
    let ch = channel();
    let layers = doc(&ch).layers().unwrap();
    assert_eq!(layers.len().unwrap(), 3);

    let second = layers.get(1).unwrap();
    layers.remove(second).unwrap();

    let remaining: Vec<Layer> = layers.iter().collect::<Result<_>>().unwrap();
    let accessors: Vec<&str> = remaining.iter().map(|l| l.accessor().as_str()).collect();
    assert_eq!(accessors, vec!["doc.layers[0]", "doc.layers[1]"]);
    let names: Vec<String> = remaining.iter().map(|l| l.name().unwrap()).collect();
    assert_eq!(names, vec!["Background".to_string(), "Notes".to_string()]);

    layers.clear().unwrap();
    assert!(layers.get(0).unwrap_err().is_resolution());
}

#[test]
fn test_new_and_move_on_specialized_collection() {
    let ch = channel();
    let layers = doc(&ch).layers().unwrap();

    let sketch = layers
        .new(Args::new().named("name", "Sketch".to_string()).named("opacity", 0.25))
        .unwrap();
    assert_eq!(sketch.accessor().as_str(), "doc.layers[3]");
    assert_eq!(sketch.opacity().unwrap(), 0.25);

    layers.move_item(3, 0).unwrap();
    assert_eq!(layers.get(0).unwrap().name().unwrap(), "Sketch");
    assert_eq!(layers.by_key("Sketch").unwrap().opacity().unwrap(), 0.25);
}

#[test]
fn test_removed_object_fails_with_resolution_error() {
    let ch = channel();
    let layers = doc(&ch).layers().unwrap();

    let ink = layers.by_key("Ink").unwrap();
    assert_eq!(ink.opacity().unwrap(), 0.8);

    layers.remove(ink.clone()).unwrap();
    let err = ink.opacity().unwrap_err();
    assert!(err.is_resolution(), "{:?}", err);

    // Index paths past the end resolve to nothing as well.
    let last = layers.get(1).unwrap();
    layers.remove_at(1).unwrap();
    assert!(last.name().unwrap_err().is_resolution());
}

#[test]
fn test_iteration_sees_concurrent_mutation() {
    let ch = channel();
    let layers = doc(&ch).layers().unwrap();

    let mut seen = Vec::new();
    for (i, item) in layers.iter().enumerate() {
        seen.push(item.unwrap().name().unwrap());
        if i == 0 {
            // Shrinks the collection under the iterator.
            layers.remove_at(2).unwrap();
        }
    }
    assert_eq!(seen, vec!["Background".to_string(), "Ink".to_string()]);
}
