//! Proxies over remote ordered/keyed collections.
//!
//! A proxy is only `(channel, accessor)`. Elements are addressed on demand
//! as `accessor[i]` or `accessor["name"]`, and every access is a fresh round
//! trip, so remote mutation between two accesses is always visible.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

use crate::accessor::Accessor;
use crate::channel::Channel;
use crate::error::{BridgeError, Result};
use crate::interop::{self, Args};
use crate::marshal::Marshal;
use crate::value::{Kind, Value};

/// Generic proxy: index and key lookup, length and iteration.
pub struct Collection<T> {
    channel: Channel,
    accessor: Accessor,
    _element: PhantomData<fn() -> T>,
}

/// Proxy over the collection at `accessor`.
pub fn create_generic<T: Marshal>(channel: Channel, accessor: Accessor) -> Collection<T> {
    Collection {
        channel,
        accessor,
        _element: PhantomData,
    }
}

/// Proxy that also exposes the collection's structural operations.
pub fn create_specialized<T: Marshal>(channel: Channel, accessor: Accessor) -> SpecializedCollection<T> {
    SpecializedCollection {
        inner: create_generic(channel, accessor),
    }
}

fn element_tag<T: Marshal>() -> String {
    T::kind().element_tag()
}

impl<T: Marshal> Collection<T> {
    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// `accessor[index]`
    pub fn accessor_at(&self, index: usize) -> Accessor {
        self.accessor.index(index)
    }

    /// Current remote length.
    pub fn len(&self) -> Result<usize> {
        let len = interop::get_int(&self.channel, &self.accessor.member("length"))?;
        usize::try_from(len).map_err(|_| BridgeError::type_mismatch("non-negative length", len))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, index: usize) -> Result<T> {
        interop::get(&self.channel, &self.accessor_at(index))
    }

    /// Element whose `name` is `key`.
    pub fn by_key(&self, key: &str) -> Result<T> {
        interop::get(&self.channel, &self.accessor.key(key))
    }

    /// Walk the collection in remote order.
    ///
    /// Length is re-read before every step; iteration ends at the first
    /// error.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            collection: self,
            next: 0,
            done: false,
        }
    }
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            accessor: self.accessor.clone(),
            _element: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("accessor", &self.accessor)
            .finish()
    }
}

impl<T: Marshal> Marshal for Collection<T> {
    fn kind() -> Kind {
        Kind::collection(&element_tag::<T>())
    }

    fn into_value(self) -> Value {
        Value::Collection {
            element_tag: element_tag::<T>(),
            accessor: self.accessor,
        }
    }

    fn from_value(value: Value, channel: &Channel) -> Result<Self> {
        match value {
            Value::Collection { accessor, .. } => Ok(create_generic(channel.clone(), accessor)),
            other => Err(BridgeError::type_mismatch(Self::kind(), other.kind_name())),
        }
    }
}

pub struct Iter<'a, T> {
    collection: &'a Collection<T>,
    next: usize,
    done: bool,
}

impl<T: Marshal> Iterator for Iter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.collection.len() {
            Ok(len) if self.next < len => {
                let index = self.next;
                self.next += 1;
                let item = self.collection.get(index);
                self.done = item.is_err();
                Some(item)
            }
            Ok(_) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a, T: Marshal> IntoIterator for &'a Collection<T> {
    type Item = Result<T>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Collection proxy with `new`, `remove`, `clear` and `move`.
///
/// Derefs to [`Collection`] for lookup and iteration.
pub struct SpecializedCollection<T> {
    inner: Collection<T>,
}

impl<T: Marshal> SpecializedCollection<T> {
    /// Create an element remotely and return it.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(&self, args: Args) -> Result<T> {
        interop::call(&self.inner.channel, &self.op("new"), args)
    }

    pub fn remove(&self, item: T) -> Result<()> {
        interop::call_void(&self.inner.channel, &self.op("remove"), Args::new().arg(item))
    }

    pub fn remove_at(&self, index: usize) -> Result<()> {
        interop::call_void(
            &self.inner.channel,
            &self.op("remove"),
            Args::new().arg(to_int(index)?),
        )
    }

    pub fn clear(&self) -> Result<()> {
        interop::call_void(&self.inner.channel, &self.op("clear"), Args::new())
    }

    /// Move the element at `from` to position `to`.
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        interop::call_void(
            &self.inner.channel,
            &self.op("move"),
            Args::new().arg(to_int(from)?).arg(to_int(to)?),
        )
    }

    pub fn as_generic(&self) -> &Collection<T> {
        &self.inner
    }

    fn op(&self, name: &str) -> Accessor {
        self.inner.accessor.member(name)
    }
}

fn to_int(index: usize) -> Result<i64> {
    i64::try_from(index).map_err(|_| BridgeError::type_mismatch("int", format!("index {}", index)))
}

impl<T> Deref for SpecializedCollection<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Collection<T> {
        &self.inner
    }
}

impl<T> Clone for SpecializedCollection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for SpecializedCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecializedCollection")
            .field("accessor", &self.inner.accessor)
            .finish()
    }
}

impl<T: Marshal> Marshal for SpecializedCollection<T> {
    fn kind() -> Kind {
        Collection::<T>::kind()
    }

    fn into_value(self) -> Value {
        self.inner.into_value()
    }

    fn from_value(value: Value, channel: &Channel) -> Result<Self> {
        Ok(Self {
            inner: Collection::from_value(value, channel)?,
        })
    }
}
