//! Integration tests for the sweep tracing feature.
//!
//! These tests capture formatted subscriber output and check that sweep
//! spans and page events show up.

#![cfg(feature = "tracing")]

use std::io;
use std::sync::{Arc, Mutex};

use gc_alloc::{Allocator, GcHandle, Heap, TypeInfo};
use tracing_subscriber::fmt::MakeWriter;

static POINT: TypeInfo = TypeInfo::object("Point", 24);

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn run_cycle() {
    let heap = Arc::new(Heap::new());
    let mut allocator = Allocator::new(Arc::clone(&heap));
    for _ in 0..10 {
        allocator.allocate_object(&POINT);
    }
    allocator.prepare_for_gc();
    heap.prepare_for_gc();
    let handle = GcHandle::next();
    heap.sweep(&handle);
    heap.sweep_extra_objects(&handle);
}

#[test]
fn test_sweep_emits_spans_and_events() {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, run_cycle);

    let output = capture.contents();
    assert!(output.contains("gc_sweep"), "{output}");
    assert!(output.contains("sweep_start"), "{output}");
    assert!(output.contains("sweep_end"), "{output}");
    assert!(output.contains("page_created"), "{output}");
    assert!(output.contains("page_destroyed"), "{output}");
}

#[test]
fn test_sweep_without_subscriber() {
    run_cycle();
}
