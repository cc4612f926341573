//! Multi-listener result handle for a single image load
//!
//! An [`ImageStreamCompleter`] is driven by the decode pipeline through
//! [`set_image`](ImageStreamCompleter::set_image) and
//! [`report_error`](ImageStreamCompleter::report_error), and observed by any
//! number of [`ImageStreamListener`]s. Observers that need to know when
//! nobody is listening any more register a one-shot
//! "last listener removed" callback.
//!
//! The internal lock is never held while a listener or callback runs, so
//! listeners are free to add or remove listeners (themselves included).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::Error;
use crate::image::ImageInfo;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an [`ImageStreamListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Registration handle for a last-listener-removed callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    fn next() -> Self {
        Self(NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type ImageCallback = Arc<dyn Fn(&ImageInfo, bool) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
type LastListenerCallback = Box<dyn FnOnce() + Send>;

/// A frame and error observer attached to an [`ImageStreamCompleter`]
///
/// The id is allocated when the listener is built, so it can be recorded
/// before the listener is attached (and before it may fire).
#[derive(Clone)]
pub struct ImageStreamListener {
    id: ListenerId,
    on_image: ImageCallback,
    on_error: Option<ErrorCallback>,
}

impl ImageStreamListener {
    /// Create a listener with a frame callback
    ///
    /// The callback receives the frame and whether it is being delivered
    /// synchronously from [`ImageStreamCompleter::add_listener`].
    pub fn new<F>(on_image: F) -> Self
    where
        F: Fn(&ImageInfo, bool) + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::next(),
            on_image: Arc::new(on_image),
            on_error: None,
        }
    }

    /// Attach an error callback
    pub fn on_error<E>(mut self, on_error: E) -> Self
    where
        E: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// This listener's identity
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl fmt::Debug for ImageStreamListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStreamListener")
            .field("id", &self.id)
            .field("has_error_listener", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Default)]
struct State {
    listeners: Vec<ImageStreamListener>,
    on_last_listener_removed: Vec<(CallbackId, LastListenerCallback)>,
    current_image: Option<ImageInfo>,
    current_error: Option<Error>,
    frames_emitted: usize,
}

/// Shared handle to the frames of one image load
///
/// Cloning is cheap and every clone refers to the same stream.
#[derive(Clone, Default)]
pub struct ImageStreamCompleter {
    inner: Arc<Mutex<State>>,
}

impl ImageStreamCompleter {
    /// Create a completer with no frame yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a completer that already holds `image`
    pub fn ready(image: ImageInfo) -> Self {
        let completer = Self::new();
        {
            let mut state = completer.inner.lock();
            state.current_image = Some(image);
            state.frames_emitted = 1;
        }
        completer
    }

    /// Create a one-frame completer resolved by `future`
    ///
    /// The future runs as a task on the current tokio runtime. Success emits
    /// its frame, failure is reported to the error listeners.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    #[cfg(feature = "tokio")]
    pub fn spawn_one_frame<F>(future: F) -> Self
    where
        F: std::future::Future<Output = crate::Result<ImageInfo>> + Send + 'static,
    {
        let completer = Self::new();
        let handle = completer.clone();
        tokio::spawn(async move {
            match future.await {
                Ok(image) => handle.set_image(image),
                Err(error) => handle.report_error(error),
            }
        });
        completer
    }

    /// Attach a listener
    ///
    /// If a frame is already available it is delivered immediately with
    /// `synchronous_call = true`; a recorded error is delivered to the
    /// listener's error callback the same way.
    pub fn add_listener(&self, listener: ImageStreamListener) -> ListenerId {
        let id = listener.id;
        let (image, error) = {
            let mut state = self.inner.lock();
            state.listeners.push(listener.clone());
            (state.current_image.clone(), state.current_error.clone())
        };

        if let Some(image) = image {
            (listener.on_image)(&image, true);
        }
        if let (Some(error), Some(on_error)) = (error, &listener.on_error) {
            on_error(&error);
        }
        id
    }

    /// Detach a listener
    ///
    /// When this removes the last listener, every registered
    /// last-listener-removed callback runs once and is then discarded.
    /// Returns `false` if no listener with `id` was attached.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let callbacks = {
            let mut state = self.inner.lock();
            let Some(position) = state.listeners.iter().position(|l| l.id == id) else {
                return false;
            };
            state.listeners.remove(position);
            if !state.listeners.is_empty() {
                return true;
            }
            std::mem::take(&mut state.on_last_listener_removed)
        };

        for (_, callback) in callbacks {
            callback();
        }
        true
    }

    /// Register a callback for the transition to zero listeners
    pub fn add_on_last_listener_removed_callback<F>(&self, callback: F) -> CallbackId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = CallbackId::next();
        self.inner
            .lock()
            .on_last_listener_removed
            .push((id, Box::new(callback)));
        id
    }

    /// Unregister a last-listener-removed callback
    pub fn remove_on_last_listener_removed_callback(&self, id: CallbackId) -> bool {
        let mut state = self.inner.lock();
        let before = state.on_last_listener_removed.len();
        state.on_last_listener_removed.retain(|(cb, _)| *cb != id);
        state.on_last_listener_removed.len() != before
    }

    /// Emit a frame to every attached listener
    pub fn set_image(&self, image: ImageInfo) {
        let listeners = {
            let mut state = self.inner.lock();
            state.current_image = Some(image.clone());
            state.frames_emitted += 1;
            state.listeners.clone()
        };

        for listener in listeners {
            (listener.on_image)(&image, false);
        }
    }

    /// Record a failure and notify every error listener
    pub fn report_error(&self, error: Error) {
        let handlers: Vec<ErrorCallback> = {
            let mut state = self.inner.lock();
            state.current_error = Some(error.clone());
            state
                .listeners
                .iter()
                .filter_map(|l| l.on_error.clone())
                .collect()
        };

        if handlers.is_empty() {
            warn!(%error, "image stream failed with no error listeners");
            return;
        }
        for handler in handlers {
            handler(&error);
        }
    }

    /// Whether any listener is attached
    pub fn has_listeners(&self) -> bool {
        !self.inner.lock().listeners.is_empty()
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// The most recently emitted frame
    pub fn current_image(&self) -> Option<ImageInfo> {
        self.inner.lock().current_image.clone()
    }

    /// The recorded failure, if any
    pub fn current_error(&self) -> Option<Error> {
        self.inner.lock().current_error.clone()
    }

    /// Number of frames emitted so far
    pub fn frames_emitted(&self) -> usize {
        self.inner.lock().frames_emitted
    }

    /// Whether two handles refer to the same stream
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// A non-owning reference to this stream
    pub fn downgrade(&self) -> WeakImageStreamCompleter {
        WeakImageStreamCompleter {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for ImageStreamCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ImageStreamCompleter")
            .field("current_image", &state.current_image)
            .field("current_error", &state.current_error)
            .field("listeners", &state.listeners.len())
            .field("frames_emitted", &state.frames_emitted)
            .finish()
    }
}

/// Non-owning form of [`ImageStreamCompleter`]
#[derive(Clone, Debug)]
pub struct WeakImageStreamCompleter {
    inner: Weak<Mutex<State>>,
}

impl WeakImageStreamCompleter {
    /// Recover the handle if the stream is still alive
    pub fn upgrade(&self) -> Option<ImageStreamCompleter> {
        self.inner
            .upgrade()
            .map(|inner| ImageStreamCompleter { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(count: &Arc<AtomicUsize>) -> ImageStreamListener {
        let count = Arc::clone(count);
        ImageStreamListener::new(move |_, _| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_listener_receives_frames() {
        let completer = ImageStreamCompleter::new();
        let count = Arc::new(AtomicUsize::new(0));
        completer.add_listener(counting_listener(&count));

        completer.set_image(ImageInfo::new(Image::new(1, 1)));
        completer.set_image(ImageInfo::new(Image::new(1, 1)));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(completer.frames_emitted(), 2);
    }

    #[test]
    fn test_late_listener_gets_current_frame_synchronously() {
        let completer = ImageStreamCompleter::ready(ImageInfo::new(Image::new(3, 3)));
        let sync_calls = Arc::new(AtomicUsize::new(0));

        let calls = Arc::clone(&sync_calls);
        completer.add_listener(ImageStreamListener::new(move |info, sync| {
            assert!(sync);
            assert_eq!(info.size_bytes(), 36);
            calls.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(sync_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_last_listener_removed_fires_once() {
        let completer = ImageStreamCompleter::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let a = completer.add_listener(ImageStreamListener::new(|_, _| {}));
        let b = completer.add_listener(ImageStreamListener::new(|_, _| {}));

        let counter = Arc::clone(&fired);
        completer.add_on_last_listener_removed_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(completer.remove_listener(a));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(completer.remove_listener(b));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Callbacks are one-shot
        let c = completer.add_listener(ImageStreamListener::new(|_, _| {}));
        completer.remove_listener(c);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_unknown_listener_does_not_fire() {
        let completer = ImageStreamCompleter::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        completer.add_on_last_listener_removed_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let stray = ImageStreamListener::new(|_, _| {});
        assert!(!completer.remove_listener(stray.id()));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregistered_callback_does_not_fire() {
        let completer = ImageStreamCompleter::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = completer.add_on_last_listener_removed_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let listener = completer.add_listener(ImageStreamListener::new(|_, _| {}));
        assert!(completer.remove_on_last_listener_removed_callback(id));
        assert!(!completer.remove_on_last_listener_removed_callback(id));
        completer.remove_listener(listener);

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_can_remove_itself_during_dispatch() {
        let completer = ImageStreamCompleter::new();
        let weak = completer.downgrade();
        let own_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&own_id);
        let listener = ImageStreamListener::new(move |_, _| {
            let id = *slot.lock();
            if let (Some(completer), Some(id)) = (weak.upgrade(), id) {
                completer.remove_listener(id);
            }
        });
        *own_id.lock() = Some(listener.id());

        completer.add_listener(listener);
        completer.set_image(ImageInfo::new(Image::new(1, 1)));
        assert!(!completer.has_listeners());
    }

    #[test]
    fn test_error_replayed_to_late_listener() {
        let completer = ImageStreamCompleter::new();
        completer.report_error(Error::Decode("truncated".into()));

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        completer.add_listener(
            ImageStreamListener::new(|_, _| panic!("no frame expected"))
                .on_error(move |error| *slot.lock() = Some(error.clone())),
        );

        assert_eq!(*seen.lock(), Some(Error::Decode("truncated".into())));
        assert_eq!(
            completer.current_error(),
            Some(Error::Decode("truncated".into()))
        );
    }

    #[test]
    fn test_error_without_listeners_is_recorded() {
        let completer = ImageStreamCompleter::new();
        completer.add_listener(ImageStreamListener::new(|_, _| {}));
        completer.report_error(Error::Load("404".into()));
        assert_eq!(completer.current_error(), Some(Error::Load("404".into())));
    }

    #[test]
    fn test_weak_and_ptr_eq() {
        let completer = ImageStreamCompleter::new();
        let clone = completer.clone();
        assert!(completer.ptr_eq(&clone));
        assert!(!completer.ptr_eq(&ImageStreamCompleter::new()));

        let weak = completer.downgrade();
        assert!(weak.upgrade().is_some_and(|c| c.ptr_eq(&completer)));
        drop(completer);
        drop(clone);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_spawn_one_frame() {
        let completer = ImageStreamCompleter::spawn_one_frame(async {
            Ok(ImageInfo::new(Image::new(2, 2)))
        });
        let count = Arc::new(AtomicUsize::new(0));
        completer.add_listener(counting_listener(&count));

        tokio::task::yield_now().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(completer.frames_emitted(), 1);
    }

    #[tokio::test]
    async fn test_spawn_one_frame_failure() {
        let completer = ImageStreamCompleter::spawn_one_frame(async {
            Err(Error::Load("connection reset".into()))
        });
        tokio::task::yield_now().await;
        assert_eq!(
            completer.current_error(),
            Some(Error::Load("connection reset".into()))
        );
    }
}
