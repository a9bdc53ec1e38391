/**************************************************************************/
/*  This file is part of NFGEN.                                           */
/*                                                                        */
/*  Copyright (C) 2025                                                    */
/*    CEA (Commissariat à l'énergie atomique et aux énergies              */
/*         alternatives)                                                  */
/*                                                                        */
/*  you can redistribute it and/or modify it under the terms of the GNU   */
/*  Lesser General Public License as published by the Free Software       */
/*  Foundation, version 2.1.                                              */
/*                                                                        */
/*  It is distributed in the hope that it will be useful,                 */
/*  but WITHOUT ANY WARRANTY; without even the implied warranty of        */
/*  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the         */
/*  GNU Lesser General Public License for more details.                   */
/*                                                                        */
/*  See the GNU Lesser General Public License version 2.1                 */
/*  for more details (enclosed in the file licenses/LGPLv2.1).            */
/*                                                                        */
/**************************************************************************/

//! Stats collection for `--stats`
//!
//! Events carrying a `stats` field have their other fields recorded. Unsigned
//! integer fields are aggregated (first, last, min, max, sum, count), other
//! fields keep their last value. Spans with a `timing` field have their
//! durations aggregated under `time_<span name>_ms`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::Context, registry::LookupSpan};

/// Summary of all the values an integer field took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
struct Aggregate {
    first: u64,
    last: u64,
    min: u64,
    max: u64,
    sum: u64,
    count: u64,
}

impl Aggregate {
    fn new(value: u64) -> Self {
        Aggregate {
            first: value,
            last: value,
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn add(&mut self, value: u64) {
        self.last = value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum = self.sum.saturating_add(value);
        self.count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum Stat {
    Int(Aggregate),
    Value(serde_json::Value),
}

#[derive(Default)]
struct Stats(BTreeMap<String, Stat>);

impl Stats {
    fn record_int(&mut self, name: &str, value: u64) {
        match self.0.get_mut(name) {
            Some(Stat::Int(a)) => a.add(value),
            _ => {
                self.0.insert(name.to_owned(), Stat::Int(Aggregate::new(value)));
            }
        }
    }

    fn record(&mut self, name: &str, value: serde_json::Value) {
        self.0.insert(name.to_owned(), Stat::Value(value));
    }
}

impl Visit for Stats {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if !ignored(field) {
            self.record(field.name(), format!("{:?}", value).into())
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if !ignored(field) {
            self.record(field.name(), value.into())
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if !ignored(field) {
            self.record_int(field.name(), value)
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if !ignored(field) {
            self.record(field.name(), value.into())
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if !ignored(field) {
            self.record(field.name(), value.into())
        }
    }
}

fn ignored(field: &Field) -> bool {
    matches!(field.name(), "message" | "stats")
}

struct Inner {
    stats: Stats,
    /// None once dumped
    file: Option<File>,
}

/// A layer recording stats, written as json to a file when `dump()` is called.
/// Cloning returns a new reference to the same stats.
#[derive(Clone)]
pub struct StatsLayer {
    inner: Arc<Mutex<Inner>>,
}

impl StatsLayer {
    /// Creates a StatsLayer, writing to file when dump() is called.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                stats: Stats::default(),
                file: Some(file),
            })),
        }
    }

    /// Writes stats to the file. Noop after first invocation.
    pub fn dump(&self) {
        let mut inner = self.inner.lock().expect("poisoned lock");
        if let Some(file) = inner.file.take() {
            if let Err(e) = serde_json::to_writer_pretty(file, &inner.stats.0) {
                tracing::warn!("failed to write stats: {}", e);
            }
        }
    }

    #[cfg(test)]
    fn get(&self, name: &str) -> Option<Stat> {
        self.inner.lock().unwrap().stats.0.get(name).cloned()
    }
}

struct SpanStart(Instant);

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for StatsLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().fields().field("stats").is_none() {
            return;
        }
        let mut inner = self.inner.lock().expect("poisoned lock");
        event.record(&mut inner.stats);
    }

    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: Context<'_, S>,
    ) {
        if attrs.metadata().fields().field("timing").is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanStart(Instant::now()))
        }
    }

    fn on_close(&self, id: tracing::span::Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(&id) {
            if let Some(SpanStart(start)) = span.extensions().get() {
                let key = format!("time_{}_ms", span.name());
                let mut inner = self.inner.lock().expect("poisoned lock");
                inner.stats.record_int(&key, start.elapsed().as_millis() as u64);
            }
        }
    }
}
