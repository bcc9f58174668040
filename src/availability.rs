//! Edge-triggered "can I create one now?" notifications per interface type.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::IfaceType;
use crate::listener::{CallbackContext, InterfaceAvailableListener, Registration, deliver_one};

struct Subscriber {
    registration: Registration<dyn InterfaceAvailableListener>,
    /// Last value delivered to this registration. Starts out `false`.
    last: bool,
}

impl Subscriber {
    fn update(&mut self, available: bool) {
        if self.last == available {
            return;
        }
        self.last = available;
        deliver_one(&self.registration, move |listener| {
            listener.on_availability_changed(available)
        });
    }
}

#[derive(Default)]
pub struct AvailabilityNotifier {
    subscribers: BTreeMap<IfaceType, Vec<Subscriber>>,
}

impl AvailabilityNotifier {
    pub fn new() -> Self {
        AvailabilityNotifier::default()
    }

    /// Adds a subscriber for `iface_type`. `available_now` is delivered right
    /// away if it is `true`. Returns false for a duplicate registration,
    /// which is ignored.
    pub fn register(
        &mut self,
        iface_type: IfaceType,
        listener: Arc<dyn InterfaceAvailableListener>,
        context: CallbackContext,
        available_now: bool,
    ) -> bool {
        let subscribers = self.subscribers.entry(iface_type).or_default();
        if subscribers
            .iter()
            .any(|s| s.registration.same_as(&listener, &context))
        {
            debug!(%iface_type, "duplicate availability listener ignored");
            return false;
        }
        let mut subscriber = Subscriber {
            registration: Registration { listener, context },
            last: false,
        };
        subscriber.update(available_now);
        subscribers.push(subscriber);
        true
    }

    /// Recomputes availability for every type that has subscribers and
    /// notifies those whose value changed.
    pub fn refresh(&mut self, mut available: impl FnMut(IfaceType) -> bool) {
        for (iface_type, subscribers) in self.subscribers.iter_mut() {
            let now = available(*iface_type);
            for subscriber in subscribers.iter_mut() {
                subscriber.update(now);
            }
        }
    }

    pub fn subscriber_count(&self, iface_type: IfaceType) -> usize {
        self.subscribers.get(&iface_type).map_or(0, Vec::len)
    }

    /// Last value delivered for `iface_type`, if anyone is listening.
    pub fn last_delivered(&self, iface_type: IfaceType) -> Option<bool> {
        self.subscribers
            .get(&iface_type)
            .and_then(|s| s.first())
            .map(|s| s.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Looper;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Flips(Mutex<Vec<bool>>);

    impl InterfaceAvailableListener for Flips {
        fn on_availability_changed(&self, available: bool) {
            self.0.lock().unwrap().push(available);
        }
    }

    #[test]
    fn test_initial_false_is_not_delivered() {
        let flips = Arc::new(Flips::default());
        let mut notifier = AvailabilityNotifier::new();
        notifier.register(IfaceType::Nan, flips.clone(), CallbackContext::Inline, false);
        assert!(flips.0.lock().unwrap().is_empty());

        notifier.register(IfaceType::Sta, flips.clone(), CallbackContext::Inline, true);
        assert_eq!(*flips.0.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_refresh_only_delivers_transitions() {
        let flips = Arc::new(Flips::default());
        let mut notifier = AvailabilityNotifier::new();
        notifier.register(IfaceType::Sta, flips.clone(), CallbackContext::Inline, true);

        notifier.refresh(|_| true);
        notifier.refresh(|_| false);
        notifier.refresh(|_| false);
        notifier.refresh(|_| true);

        assert_eq!(*flips.0.lock().unwrap(), vec![true, false, true]);
        assert_eq!(notifier.last_delivered(IfaceType::Sta), Some(true));
        assert_eq!(notifier.last_delivered(IfaceType::Ap), None);
    }

    #[test]
    fn test_duplicate_registration_delivers_once() {
        let flips = Arc::new(Flips::default());
        let looper = Looper::new();
        let mut notifier = AvailabilityNotifier::new();
        assert!(notifier.register(IfaceType::P2p, flips.clone(), looper.clone().into(), true));
        assert!(!notifier.register(IfaceType::P2p, flips.clone(), looper.clone().into(), true));
        assert_eq!(notifier.subscriber_count(IfaceType::P2p), 1);

        looper.dispatch_all();
        assert_eq!(*flips.0.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_types_are_tracked_independently() {
        let sta = Arc::new(Flips::default());
        let ap = Arc::new(Flips::default());
        let mut notifier = AvailabilityNotifier::new();
        notifier.register(IfaceType::Sta, sta.clone(), CallbackContext::Inline, false);
        notifier.register(IfaceType::Ap, ap.clone(), CallbackContext::Inline, false);

        notifier.refresh(|t| t == IfaceType::Ap);
        assert!(sta.0.lock().unwrap().is_empty());
        assert_eq!(*ap.0.lock().unwrap(), vec![true]);
    }
}
