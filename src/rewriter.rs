//! Drives the rewrite over a live document.
//!
//! [`LiveRewriter`] performs the initial sweep, then keeps rewriting legacy
//! elements as the page inserts them. Host notifications arrive as
//! [`RewriteEvent`]s on an unbounded channel; caption fetches run as local
//! futures owned by the rewriter, so the loop works unchanged on a tokio
//! `LocalSet` and on the browser's microtask queue.

use crate::builder::{PlaybackSupport, ReplacementBuilder};
use crate::captions::{CaptionFetch, CaptionSource, SubtitleLoader, CAPTION_MIME};
use crate::controls::EngineConfig;
use crate::dom::Dom;
use crate::extractor::{self, LEGACY_TAGS};
use crate::manifest::RewriteRecord;
use crate::media::{parse_dimension, MediaIdentifier};
use crate::resolver::UrlResolver;
use futures_util::future::{select, Either, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::ops::ControlFlow;
use std::pin::pin;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sending half of the event channel handed to hosts.
pub type EventSender<N> = mpsc::UnboundedSender<RewriteEvent<N>>;
/// Receiving half consumed by [`LiveRewriter::run`].
pub type EventReceiver<N> = mpsc::UnboundedReceiver<RewriteEvent<N>>;

/// Creates the channel hosts use to notify the rewriter.
pub fn event_channel<N>() -> (EventSender<N>, EventReceiver<N>) {
    mpsc::unbounded_channel()
}

/// Notifications delivered to the rewriter.
#[derive(Debug)]
pub enum RewriteEvent<N> {
    /// The document finished parsing; sweep it.
    InitialLoad,
    /// Nodes were inserted; rewrite any legacy elements at or below them.
    SubtreeInserted(Vec<N>),
    /// A caption fetch completed outside the rewriter.
    CaptionFetched(CaptionFetch<N>),
    /// The page is going away; stop observing.
    Teardown,
}

impl<N> RewriteEvent<N> {
    /// Event for a `pagehide` notification.
    ///
    /// A page entering the back/forward cache comes back unchanged and keeps
    /// its observer, so only a final unload tears down.
    pub fn page_hidden(persisted: bool) -> Option<Self> {
        (!persisted).then_some(Self::Teardown)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InitialLoad => "initial_load",
            Self::SubtreeInserted(_) => "subtree_inserted",
            Self::CaptionFetched(_) => "caption_fetched",
            Self::Teardown => "teardown",
        }
    }
}

/// Delivers `event`; returns false once the rewriter has stopped listening.
pub fn post<N>(events: &EventSender<N>, event: RewriteEvent<N>) -> bool {
    match events.send(event) {
        Ok(()) => true,
        Err(mpsc::error::SendError(event)) => {
            debug!(event = event.kind(), "rewriter stopped, event dropped");
            false
        }
    }
}

/// Why an element was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not an `<embed>` or `<object>`.
    NotLegacy,
    /// Already claimed by an earlier visit.
    AlreadyVisited,
    /// No longer in the document.
    Detached,
    /// Carries no playlist reference.
    NoReference,
    /// The document has no usable location to resolve against.
    NoLocation,
    /// The reference did not resolve to a playlist URL.
    Unresolvable,
    /// The host refused the replacement.
    HostError,
}

/// Result of visiting one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visit<N> {
    /// Replaced; carries the new container.
    Rewritten(N),
    /// Left untouched.
    Skipped(SkipReason),
}

/// Running totals for one rewriter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    /// Legacy elements replaced.
    pub rewritten: usize,
    /// Legacy elements visited but left untouched.
    pub skipped: usize,
    /// Caption tracks added to players.
    pub captions_attached: usize,
    /// Caption tracks that could not be loaded.
    pub caption_failures: usize,
}

/// Rewrites legacy media elements of one document for as long as it is observed.
pub struct LiveRewriter<D: Dom, C> {
    dom: D,
    resolver: UrlResolver,
    builder: ReplacementBuilder,
    subtitles: Option<SubtitleLoader<C>>,
    in_flight: FuturesUnordered<LocalBoxFuture<'static, CaptionFetch<D::Node>>>,
    subscription: Option<D::Subscription>,
    stopped: bool,
    stats: RewriteStats,
    records: Vec<RewriteRecord>,
}

impl<D, C> LiveRewriter<D, C>
where
    D: Dom,
    D::Node: 'static,
    C: CaptionSource,
{
    /// Rewriter for `dom` reading caption files from `captions`.
    pub fn new(dom: D, config: &EngineConfig, captions: C) -> Self {
        let subtitles = config
            .captions
            .clone()
            .filter(|tracks| !tracks.is_empty())
            .map(|tracks| SubtitleLoader::new(captions, tracks));
        Self {
            dom,
            resolver: UrlResolver::new(config.resolution.clone()),
            builder: ReplacementBuilder::new(config.player),
            subtitles,
            in_flight: FuturesUnordered::new(),
            subscription: None,
            stopped: false,
            stats: RewriteStats::default(),
            records: Vec::new(),
        }
    }

    /// Document being rewritten.
    pub fn dom(&self) -> &D {
        &self.dom
    }

    /// Subscribes to insertions; the host reports them on `events`.
    pub fn observe(&mut self, events: EventSender<D::Node>) -> Result<(), crate::dom::DomError> {
        let subscription = self.dom.observe(events)?;
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Whether an observation subscription is active.
    pub fn is_observing(&self) -> bool {
        self.subscription.is_some()
    }

    /// Rewrites every legacy element currently in the document. Returns how many were replaced.
    pub fn sweep(&mut self) -> usize {
        let Some(root) = self.dom.root() else {
            warn!("document has no root element");
            return 0;
        };
        let candidates = self.dom.query_tags(&root, LEGACY_TAGS);
        debug!(count = candidates.len(), "sweeping legacy elements");
        self.visit_all(candidates)
    }

    /// Rewrites legacy elements at or below freshly inserted `nodes`.
    pub fn process_inserted(&mut self, nodes: &[D::Node]) -> usize {
        let mut candidates = Vec::new();
        for node in nodes {
            let is_legacy = self
                .dom
                .tag_name(node)
                .map(|tag| extractor::is_legacy_tag(&tag))
                .unwrap_or(false);
            if is_legacy {
                candidates.push(node.clone());
            }
            candidates.extend(self.dom.query_tags(node, LEGACY_TAGS));
        }
        self.visit_all(candidates)
    }

    fn visit_all(&mut self, candidates: Vec<D::Node>) -> usize {
        candidates
            .iter()
            .filter(|node| matches!(self.process(node), Visit::Rewritten(_)))
            .count()
    }

    /// Visits one element, replacing it when it carries a resolvable playlist reference.
    ///
    /// Each element is claimed on its first visit; later visits are no-ops.
    pub fn process(&mut self, node: &D::Node) -> Visit<D::Node> {
        if !self.dom.is_connected(node) {
            return Visit::Skipped(SkipReason::Detached);
        }
        let Some(tag) = self
            .dom
            .tag_name(node)
            .filter(|tag| extractor::is_legacy_tag(tag))
        else {
            return Visit::Skipped(SkipReason::NotLegacy);
        };
        if !self.dom.claim(node) {
            return Visit::Skipped(SkipReason::AlreadyVisited);
        }

        let Some(reference) = extractor::extract(&self.dom, node) else {
            return self.skip(SkipReason::NoReference);
        };
        let Some(location) = self.dom.location() else {
            return self.skip(SkipReason::NoLocation);
        };
        let width = self
            .dom
            .attribute(node, "width")
            .as_deref()
            .and_then(parse_dimension);
        let height = self
            .dom
            .attribute(node, "height")
            .as_deref()
            .and_then(parse_dimension);
        let Some(target) = self.resolver.resolve(&reference, &location, width, height) else {
            debug!(%reference, "playlist reference left unresolved");
            return self.skip(SkipReason::Unresolvable);
        };

        let identifier = MediaIdentifier::from_reference(&reference);
        let support = PlaybackSupport::detect(&self.dom, target.primary_format);
        let replacement = self.builder.build(&target, identifier.as_ref(), support);
        let container = match self.dom.replace_with(node, &replacement.element) {
            Ok(container) => container,
            Err(err) => {
                warn!(%reference, %err, "host rejected replacement");
                return self.skip(SkipReason::HostError);
            }
        };
        info!(
            %reference,
            primary = %target.primary_url,
            native = support == PlaybackSupport::Native,
            "rewrote legacy <{tag}>"
        );

        if let (Some(loader), Some(identifier)) = (&self.subtitles, &replacement.captions) {
            if let Some(player) = self.dom.query_tags(&container, &["video"]).into_iter().next() {
                self.in_flight.extend(loader.requests(&player, identifier));
            }
        }
        self.records.push(RewriteRecord::new(
            tag,
            reference,
            target,
            identifier,
            support == PlaybackSupport::Native,
        ));
        self.stats.rewritten += 1;
        Visit::Rewritten(container)
    }

    fn skip(&mut self, reason: SkipReason) -> Visit<D::Node> {
        self.stats.skipped += 1;
        Visit::Skipped(reason)
    }

    /// Adds the track from a completed fetch to its player.
    pub fn attach_caption(&mut self, fetch: CaptionFetch<D::Node>) {
        let CaptionFetch {
            player,
            track,
            result,
        } = fetch;
        let text = match result {
            Ok(text) => text,
            Err(err) => {
                warn!(%err, srclang = %track.srclang, "caption track unavailable");
                self.stats.caption_failures += 1;
                return;
            }
        };
        if !self.dom.is_connected(&player) {
            debug!(srclang = %track.srclang, "player removed before captions arrived");
            self.stats.caption_failures += 1;
            return;
        }
        let attached = self
            .dom
            .create_object_url(&text, CAPTION_MIME)
            .and_then(|src| self.dom.append_child(&player, &track.element(&src)));
        match attached {
            Ok(_) => self.stats.captions_attached += 1,
            Err(err) => {
                warn!(%err, srclang = %track.srclang, "failed to attach caption track");
                self.stats.caption_failures += 1;
            }
        }
    }

    /// Handles one event. Breaks once the rewriter has been torn down.
    pub fn dispatch(&mut self, event: RewriteEvent<D::Node>) -> ControlFlow<()> {
        if self.stopped {
            return ControlFlow::Break(());
        }
        match event {
            RewriteEvent::InitialLoad => {
                self.sweep();
            }
            RewriteEvent::SubtreeInserted(nodes) => {
                self.process_inserted(&nodes);
            }
            RewriteEvent::CaptionFetched(fetch) => self.attach_caption(fetch),
            RewriteEvent::Teardown => {
                self.shutdown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Consumes events and caption completions until teardown or until the channel closes.
    ///
    /// Captions still in flight when the channel closes are drained first.
    pub async fn run(&mut self, events: &mut EventReceiver<D::Node>) {
        loop {
            if self.in_flight.is_empty() {
                match events.recv().await {
                    Some(event) => {
                        if self.dispatch(event).is_break() {
                            return;
                        }
                    }
                    None => return,
                }
                continue;
            }

            let step = {
                let next_event = pin!(events.recv());
                match select(next_event, self.in_flight.next()).await {
                    Either::Left((event, _)) => Either::Left(event),
                    Either::Right((fetch, _)) => Either::Right(fetch),
                }
            };
            match step {
                Either::Left(Some(event)) => {
                    if self.dispatch(event).is_break() {
                        return;
                    }
                }
                Either::Left(None) => {
                    self.drain_captions().await;
                    return;
                }
                Either::Right(Some(fetch)) => self.attach_caption(fetch),
                Either::Right(None) => {}
            }
        }
    }

    /// Handles queued events and pending captions until nothing is left to do.
    ///
    /// Unlike [`run`](Self::run) this never waits for new host events.
    pub async fn run_until_idle(&mut self, events: &mut EventReceiver<D::Node>) {
        loop {
            while let Ok(event) = events.try_recv() {
                if self.dispatch(event).is_break() {
                    return;
                }
            }
            match self.in_flight.next().await {
                Some(fetch) => self.attach_caption(fetch),
                None => return,
            }
        }
    }

    async fn drain_captions(&mut self) {
        while let Some(fetch) = self.in_flight.next().await {
            self.attach_caption(fetch);
        }
    }

    /// Stops observing and abandons pending caption fetches.
    pub fn shutdown(&mut self) {
        if self.subscription.take().is_some() {
            info!(rewritten = self.stats.rewritten, "stopped observing document");
        }
        self.in_flight = FuturesUnordered::new();
        self.stopped = true;
    }

    /// Caption fetches not yet completed.
    pub fn pending_captions(&self) -> usize {
        self.in_flight.len()
    }

    /// Running totals.
    pub fn stats(&self) -> RewriteStats {
        self.stats
    }

    /// Records of rewritten elements, in rewrite order.
    pub fn records(&self) -> &[RewriteRecord] {
        &self.records
    }

    /// Takes the accumulated records.
    pub fn take_records(&mut self) -> Vec<RewriteRecord> {
        std::mem::take(&mut self.records)
    }
}
