//! Browser host: drives the rewriter against the live page from a content script.

use crate::captions::{bundled_url, CaptionError, CaptionSource};
use crate::controls::EngineConfig;
use crate::dom::{ClickAction, Dom, DomError, ElementSpec, NodeSpec};
use crate::rewriter::{event_channel, post, EventSender, LiveRewriter, RewriteEvent};
use futures_util::future::{FutureExt, LocalBoxFuture};
use js_sys::{Array, Function, Object, Promise, Reflect, WeakSet};
use std::io;
use tracing::{debug, info};
use tracing_subscriber::fmt::MakeWriter;
use url::Url;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    Document, Element, HtmlMediaElement, MutationObserver, MutationObserverInit, MutationRecord,
    PageTransitionEvent, Response, Window,
};

const CONFIRMATION_MS: i32 = 1500;

fn host_error(value: JsValue) -> DomError {
    DomError::Host(
        value
            .as_string()
            .unwrap_or_else(|| format!("{value:?}")),
    )
}

fn set_property(target: &JsValue, key: &str, value: &JsValue) -> Result<(), DomError> {
    Reflect::set(target, &JsValue::from_str(key), value)
        .map(|_| ())
        .map_err(host_error)
}

fn get_property(target: &JsValue, key: &str) -> Option<JsValue> {
    Reflect::get(target, &JsValue::from_str(key))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

/// Live page backed by `web-sys`.
#[derive(Clone)]
pub struct WebDom {
    window: Window,
    document: Document,
    claimed: WeakSet,
}

impl WebDom {
    fn new(window: Window) -> Result<Self, DomError> {
        let document = window
            .document()
            .ok_or_else(|| DomError::Host("window has no document".to_string()))?;
        Ok(Self {
            window,
            document,
            claimed: WeakSet::new(),
        })
    }

    fn materialize(&self, spec: &ElementSpec) -> Result<Element, DomError> {
        let element = self
            .document
            .create_element(spec.tag())
            .map_err(host_error)?;
        for (name, value) in spec.attributes() {
            element.set_attribute(name, value).map_err(host_error)?;
        }
        for child in spec.children() {
            match child {
                NodeSpec::Element(nested) => {
                    let nested = self.materialize(nested)?;
                    element.append_child(&nested).map_err(host_error)?;
                }
                NodeSpec::Text(text) => {
                    let text = self.document.create_text_node(text);
                    element.append_child(&text).map_err(host_error)?;
                }
            }
        }
        if let Some(action) = spec.click_action() {
            self.wire_click(&element, action.clone())?;
        }
        Ok(element)
    }

    fn wire_click(&self, element: &Element, action: ClickAction) -> Result<(), DomError> {
        let ClickAction::CopyToClipboard { text, confirmation } = action;
        let window = self.window.clone();
        let target = element.clone();
        let handler = Closure::<dyn FnMut(web_sys::Event)>::new(move |_event: web_sys::Event| {
            let Some(promise) = write_clipboard(&window, &text) else {
                return;
            };
            let window = window.clone();
            let target = target.clone();
            let confirmation = confirmation.clone();
            spawn_local(async move {
                if JsFuture::from(promise).await.is_err() {
                    return;
                }
                let original = target.text_content();
                target.set_text_content(Some(&confirmation));
                let restore_target = target.clone();
                let restore = Closure::once_into_js(move || {
                    restore_target.set_text_content(original.as_deref());
                });
                let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(
                    restore.unchecked_ref(),
                    CONFIRMATION_MS,
                );
            });
        });
        element
            .add_event_listener_with_callback("click", handler.as_ref().unchecked_ref())
            .map_err(host_error)?;
        // The listener lives as long as the element.
        handler.forget();
        Ok(())
    }
}

/// `navigator.clipboard.writeText(text)`, or `None` when the page has no clipboard access.
fn write_clipboard(window: &Window, text: &str) -> Option<Promise> {
    let clipboard = get_property(&get_property(window, "navigator")?, "clipboard")?;
    let write_text = get_property(&clipboard, "writeText")?.dyn_into::<Function>().ok()?;
    write_text
        .call1(&clipboard, &JsValue::from_str(text))
        .ok()?
        .dyn_into::<Promise>()
        .ok()
}

/// Observation guard; dropping it disconnects the `MutationObserver`.
pub struct WebObservation {
    observer: MutationObserver,
    _callback: Closure<dyn FnMut(Array, MutationObserver)>,
}

impl Drop for WebObservation {
    fn drop(&mut self) {
        self.observer.disconnect();
    }
}

impl Dom for WebDom {
    type Node = Element;
    type Subscription = WebObservation;

    fn root(&self) -> Option<Element> {
        self.document.document_element()
    }

    fn location(&self) -> Option<Url> {
        let href = self.document.url().ok()?;
        Url::parse(&href).ok()
    }

    fn tag_name(&self, node: &Element) -> Option<String> {
        Some(node.tag_name().to_ascii_lowercase())
    }

    fn attribute(&self, node: &Element, name: &str) -> Option<String> {
        node.get_attribute(name)
    }

    fn parent(&self, node: &Element) -> Option<Element> {
        node.parent_element()
    }

    fn query_tags(&self, scope: &Element, tags: &[&str]) -> Vec<Element> {
        let Ok(list) = scope.query_selector_all(&tags.join(",")) else {
            return Vec::new();
        };
        (0..list.length())
            .filter_map(|idx| list.item(idx))
            .filter_map(|node| node.dyn_into::<Element>().ok())
            .collect()
    }

    fn is_connected(&self, node: &Element) -> bool {
        node.is_connected()
    }

    fn claim(&self, node: &Element) -> bool {
        let key: &Object = node.as_ref();
        if self.claimed.has(key) {
            return false;
        }
        self.claimed.add(key);
        true
    }

    fn replace_with(&self, old: &Element, replacement: &ElementSpec) -> Result<Element, DomError> {
        let parent = old
            .parent_node()
            .ok_or_else(|| DomError::Detached(old.tag_name()))?;
        let new = self.materialize(replacement)?;
        parent.replace_child(&new, old).map_err(host_error)?;
        Ok(new)
    }

    fn append_child(&self, parent: &Element, child: &ElementSpec) -> Result<Element, DomError> {
        let child = self.materialize(child)?;
        parent.append_child(&child).map_err(host_error)?;
        Ok(child)
    }

    fn can_play_type(&self, mime_type: &str) -> bool {
        self.document
            .create_element("video")
            .ok()
            .and_then(|probe| probe.dyn_into::<HtmlMediaElement>().ok())
            .map(|probe| !probe.can_play_type(mime_type).is_empty())
            .unwrap_or(false)
    }

    fn create_object_url(&self, contents: &str, mime_type: &str) -> Result<String, DomError> {
        let parts = Array::of1(&JsValue::from_str(contents));
        let options = web_sys::BlobPropertyBag::new();
        set_property(&options, "type", &JsValue::from_str(mime_type))?;
        let blob = web_sys::Blob::new_with_str_sequence_and_options(&parts, &options)
            .map_err(host_error)?;
        web_sys::Url::create_object_url_with_blob(&blob).map_err(host_error)
    }

    fn observe(&self, events: EventSender<Element>) -> Result<WebObservation, DomError> {
        let callback = Closure::<dyn FnMut(Array, MutationObserver)>::new(
            move |records: Array, _observer: MutationObserver| {
                let mut inserted = Vec::new();
                for record in records.iter() {
                    let Ok(record) = record.dyn_into::<MutationRecord>() else {
                        continue;
                    };
                    let added = record.added_nodes();
                    inserted.extend(
                        (0..added.length())
                            .filter_map(|idx| added.item(idx))
                            .filter_map(|node| node.dyn_into::<Element>().ok()),
                    );
                }
                if !inserted.is_empty() {
                    post(&events, RewriteEvent::SubtreeInserted(inserted));
                }
            },
        );
        let observer =
            MutationObserver::new(callback.as_ref().unchecked_ref()).map_err(host_error)?;
        let init = MutationObserverInit::new();
        set_property(&init, "childList", &JsValue::TRUE)?;
        set_property(&init, "subtree", &JsValue::TRUE)?;
        observer
            .observe_with_options(&self.document, &init)
            .map_err(host_error)?;
        Ok(WebObservation {
            observer,
            _callback: callback,
        })
    }
}

fn fetch_error(path: &str, value: JsValue) -> CaptionError {
    CaptionError::Fetch {
        path: path.to_string(),
        message: value.as_string().unwrap_or_else(|| format!("{value:?}")),
    }
}

/// Caption files packaged with the extension, read through `chrome.runtime.getURL`.
///
/// Outside an extension context every track is missing.
struct ExtensionCaptions {
    window: Window,
}

impl ExtensionCaptions {
    fn resource_url(path: &str) -> Option<String> {
        get_property(&js_sys::global(), "chrome")
            .and_then(|chrome| get_property(&chrome, "runtime"))
            .and_then(|runtime| {
                let get_url = get_property(&runtime, "getURL")?.dyn_into::<Function>().ok()?;
                get_url.call1(&runtime, &JsValue::from_str(path)).ok()
            })
            .and_then(|url| url.as_string())
    }
}

impl CaptionSource for ExtensionCaptions {
    fn fetch(&self, path: &str) -> LocalBoxFuture<'static, Result<String, CaptionError>> {
        let path = path.to_string();
        let url = match bundled_url(&path, Self::resource_url) {
            Ok(url) => url,
            Err(err) => {
                debug!(%path, "no extension runtime, caption unavailable");
                return futures_util::future::ready(Err(err)).boxed_local();
            }
        };
        let request = self.window.fetch_with_str(&url);
        async move {
            let response: Response = JsFuture::from(request)
                .await
                .and_then(|value| value.dyn_into())
                .map_err(|value| fetch_error(&path, value))?;
            if response.status() == 404 {
                return Err(CaptionError::Missing(path));
            }
            if !response.ok() {
                return Err(CaptionError::Fetch {
                    message: format!("HTTP {}", response.status()),
                    path,
                });
            }
            let body = response.text().map_err(|value| fetch_error(&path, value))?;
            let text = JsFuture::from(body)
                .await
                .map_err(|value| fetch_error(&path, value))?;
            text.as_string().ok_or_else(|| CaptionError::Fetch {
                path,
                message: "response body is not text".to_string(),
            })
        }
        .boxed_local()
    }
}

struct ConsoleWriter(Vec<u8>);

impl io::Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.0.is_empty() {
            let line = String::from_utf8_lossy(&self.0);
            web_sys::console::log_1(&JsValue::from_str(line.trim_end()));
            self.0.clear();
        }
        Ok(())
    }
}

impl Drop for ConsoleWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}

struct ConsoleMakeWriter;

impl<'a> MakeWriter<'a> for ConsoleMakeWriter {
    type Writer = ConsoleWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleWriter(Vec::new())
    }
}

fn init_logging() {
    // A second install on the same page keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
        .with_writer(ConsoleMakeWriter)
        .without_time()
        .with_ansi(false)
        .try_init();
}

fn listen_once(
    target: &web_sys::EventTarget,
    event: &str,
    action: impl FnOnce() + 'static,
) -> Result<(), JsValue> {
    let callback = Closure::once_into_js(action);
    target.add_event_listener_with_callback(event, callback.unchecked_ref())
}

fn listen_page_hide(window: &Window, events: EventSender<Element>) -> Result<(), JsValue> {
    let callback = Closure::<dyn FnMut(web_sys::Event)>::new(move |event: web_sys::Event| {
        let persisted = event
            .dyn_ref::<PageTransitionEvent>()
            .map(PageTransitionEvent::persisted)
            .unwrap_or(false);
        if let Some(teardown) = RewriteEvent::page_hidden(persisted) {
            post(&events, teardown);
        } else {
            debug!("page entering back/forward cache, still observing");
        }
    });
    window.add_event_listener_with_callback("pagehide", callback.as_ref().unchecked_ref())?;
    // Lives as long as the page.
    callback.forget();
    Ok(())
}

/// Starts rewriting the current page.
///
/// `options` is a JSON-compatible object with the fields of [`EngineConfig`];
/// `undefined` or `null` selects the defaults.
#[wasm_bindgen]
pub fn install(options: JsValue) -> Result<(), JsValue> {
    init_logging();
    let config = if options.is_undefined() || options.is_null() {
        EngineConfig::default()
    } else {
        let json = String::from(js_sys::JSON::stringify(&options)?);
        EngineConfig::from_json(&json).map_err(|err| JsValue::from_str(&err.to_string()))?
    };

    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no global window"))?;
    let dom = WebDom::new(window.clone()).map_err(|err| JsValue::from_str(&err.to_string()))?;
    let document = dom.document.clone();
    let (events, mut receiver) = event_channel();

    let mut rewriter = LiveRewriter::new(
        dom,
        &config,
        ExtensionCaptions {
            window: window.clone(),
        },
    );
    rewriter
        .observe(events.clone())
        .map_err(|err| JsValue::from_str(&err.to_string()))?;

    if document.ready_state() == "loading" {
        let loaded = events.clone();
        listen_once(&document, "DOMContentLoaded", move || {
            post(&loaded, RewriteEvent::InitialLoad);
        })?;
    } else {
        post(&events, RewriteEvent::InitialLoad);
    }
    listen_page_hide(&window, events)?;

    spawn_local(async move {
        rewriter.run(&mut receiver).await;
        debug!(stats = ?rewriter.stats(), "rewriter finished");
    });
    info!("embedfix installed");
    Ok(())
}
