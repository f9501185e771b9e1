use std::io;
use std::sync::Arc;

/// The callback a sink registers with a [`Reactor`]: the sink's drain routine.
///
/// It must be invoked each time the registered handle becomes writable while the registration is
/// armed, and never while it is disarmed or after it has been cancelled.
pub type WritableCallback = Box<dyn FnMut() + Send + 'static>;

/// An event loop primitive that reports when a handle is writable.
///
/// A sink registers its handle once at construction, arms the registration whenever it has pending
/// work, disarms it when its queue empties and cancels it exactly once when it is torn down.
///
/// Implementations must never invoke a callback from inside [`register`](Self::register),
/// [`arm`](Self::arm), [`disarm`](Self::disarm) or [`cancel`](Self::cancel): the sink calls those
/// while holding its own lock. Callbacks for one registration must not run concurrently with each
/// other.
pub trait Reactor<H: ?Sized> {
    /// Identifies a single registration.
    type Token: Send;

    /// Register interest in the writability of `handle`. The new registration starts disarmed.
    ///
    /// # Errors
    ///
    /// Fails if the handle cannot be watched by this reactor.
    fn register(&self, handle: &H, callback: WritableCallback) -> io::Result<Self::Token>;

    /// Start delivering writability notifications for the registration.
    fn arm(&self, token: &Self::Token);

    /// Stop delivering writability notifications until the registration is armed again.
    fn disarm(&self, token: &Self::Token);

    /// Remove the registration. Its callback must be dropped and never invoked again.
    fn cancel(&self, token: Self::Token);
}

macro_rules! forward_reactor {
    ($($ty:ty),*) => {
        $(
            impl<H: ?Sized, R: Reactor<H> + ?Sized> Reactor<H> for $ty {
                type Token = R::Token;

                #[inline]
                fn register(&self, handle: &H, callback: WritableCallback) -> io::Result<Self::Token> {
                    (**self).register(handle, callback)
                }
                #[inline]
                fn arm(&self, token: &Self::Token) {
                    (**self).arm(token);
                }
                #[inline]
                fn disarm(&self, token: &Self::Token) {
                    (**self).disarm(token);
                }
                #[inline]
                fn cancel(&self, token: Self::Token) {
                    (**self).cancel(token);
                }
            }
        )*
    };
}

forward_reactor!(Arc<R>, Box<R>, &'_ R);
