/// The operations shared by every lock-free stack in this crate.
///
/// Implementations are linearizable: a `pop` returns the most recently pushed value
/// that has not been popped yet, as of the instant its decisive atomic operation
/// takes effect.
///
/// # Examples
///
/// ```
/// use treiber::{HazardStack, Stack, StrictStack};
///
/// fn drain<S: Stack<u32> + ?Sized>(stack: &S) -> Vec<u32> {
///     std::iter::from_fn(|| stack.pop()).collect()
/// }
///
/// let stacks: [Box<dyn Stack<u32>>; 2] = [Box::new(HazardStack::new()), Box::new(StrictStack::new())];
/// for stack in &stacks {
///     stack.push(1);
///     stack.push(2);
///     assert_eq!(drain(&**stack), [2, 1]);
/// }
/// ```
pub trait Stack<T> {
    /// Pushes a value on top of the stack.
    fn push(&self, value: T);

    /// Pops the value on top of the stack, returning `None` if the stack is empty.
    fn pop(&self) -> Option<T>;

    /// Returns `true` if the stack is empty.
    ///
    /// The result is only a snapshot and may be stale by the time it is returned.
    fn is_empty(&self) -> bool;
}
