#![forbid(unsafe_code)]

use std::sync::Arc;

use arc_swap::ArcSwap;
use fleet_api::FleetApi;
use fleet_core::selection::Selection;
use fleet_core::Row;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Picker, PickerConfig, PickerView, SearchRequest};

#[derive(Debug, Clone)]
pub enum PickerCommand {
    Input(String),
    Blur,
    SetValue(Selection),
    Shutdown,
}

#[derive(Clone)]
pub struct PickerHandle {
    tx: mpsc::UnboundedSender<PickerCommand>,
}

impl PickerHandle {
    fn send(&self, cmd: PickerCommand) {
        if self.tx.send(cmd).is_err() {
            debug!("picker loop already stopped; command dropped");
        }
    }

    pub fn input(&self, text: impl Into<String>) { self.send(PickerCommand::Input(text.into())) }
    pub fn blur(&self) { self.send(PickerCommand::Blur) }
    pub fn set_value(&self, value: Selection) { self.send(PickerCommand::SetValue(value)) }
    pub fn shutdown(&self) { self.send(PickerCommand::Shutdown) }
}

#[derive(Clone)]
pub struct PickerReader {
    view: Arc<ArcSwap<PickerView>>,
    epoch_rx: watch::Receiver<u64>,
}

impl PickerReader {
    pub fn current(&self) -> Arc<PickerView> { self.view.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Wait for the first published view satisfying `pred`; `None` once the loop stopped.
    pub async fn wait_until(&self, pred: impl Fn(&PickerView) -> bool) -> Option<Arc<PickerView>> {
        let mut rx = self.epoch_rx.clone();
        loop {
            let v = self.view.load_full();
            if pred(&v) {
                return Some(v);
            }
            if rx.changed().await.is_err() {
                let v = self.view.load_full();
                return if pred(&v) { Some(v) } else { None };
            }
        }
    }
}

/// Run `picker` on its own task: fetch the mount suggestions, debounce input,
/// and send every blur commit to `changes`.
pub fn spawn_picker(
    api: Arc<dyn FleetApi>,
    mut picker: Picker,
    cfg: PickerConfig,
    changes: Option<mpsc::UnboundedSender<Selection>>,
) -> (PickerHandle, PickerReader) {
    let (tx, mut rx) = mpsc::unbounded_channel::<PickerCommand>();
    let mount = picker.mount();
    let view = Arc::new(ArcSwap::from_pointee(picker.view()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let view_clone = Arc::clone(&view);

    tokio::spawn(async move {
        let collection = picker.kind().collection;
        let mut inflight: JoinSet<(u64, Vec<Row>)> = JoinSet::new();
        // Single-slot debounce timer.
        let mut deadline: Option<Instant> = None;
        let mut epoch = 0u64;
        let mut publish = |picker: &Picker| {
            epoch += 1;
            view_clone.store(Arc::new(picker.view()));
            let _ = epoch_tx.send(epoch);
        };

        info!(collection = %collection, debounce_ms = %cfg.debounce.as_millis(), "picker loop started");
        launch(&mut inflight, Arc::clone(&api), &picker, mount, cfg.limit);

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        None | Some(PickerCommand::Shutdown) => break,
                        Some(PickerCommand::Input(text)) => {
                            picker.input(text);
                            deadline = Some(Instant::now() + cfg.debounce);
                        }
                        Some(PickerCommand::Blur) => {
                            let sel = picker.blur();
                            debug!(collection = %collection, id = ?sel.id, "picker commit");
                            if let Some(sink) = &changes {
                                if sink.send(sel).is_err() {
                                    debug!(collection = %collection, "change sink closed");
                                }
                            }
                        }
                        Some(PickerCommand::SetValue(v)) => picker.set_value(v),
                    }
                    publish(&picker);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let req = picker.begin_fetch(picker.query());
                    launch(&mut inflight, Arc::clone(&api), &picker, req, cfg.limit);
                    publish(&picker);
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    match joined {
                        Ok((seq, rows)) => {
                            if picker.apply_suggestions(seq, rows) {
                                publish(&picker);
                            }
                        }
                        Err(e) => warn!(collection = %collection, error = %e, "suggestion task failed"),
                    }
                }
            }
        }
        inflight.abort_all();
        info!(collection = %collection, "picker loop stopped");
    });

    (PickerHandle { tx }, PickerReader { view, epoch_rx })
}

fn launch(set: &mut JoinSet<(u64, Vec<Row>)>, api: Arc<dyn FleetApi>, picker: &Picker, req: SearchRequest, limit: usize) {
    let collection = picker.kind().collection;
    metrics::counter!("picker_fetch_total", 1);
    debug!(collection = %collection, seq = req.seq, query = %req.query, "suggestion fetch");
    set.spawn(async move {
        let rows = match api.search(collection, &req.query, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(collection = %collection, error = %e, "suggestion fetch failed; showing none");
                Vec::new()
            }
        };
        (req.seq, rows)
    });
}
