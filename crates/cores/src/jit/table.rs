/// A sparse table of `N` entries. Storage is only allocated once an entry is inserted.
pub struct Table<T, const N: usize>(Option<Box<[Option<T>]>>);

impl<T, const N: usize> Default for Table<T, N> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T, const N: usize> Table<T, N> {
    #[inline(always)]
    fn entries(&mut self) -> &mut [Option<T>] {
        self.0
            .get_or_insert_with(|| std::iter::repeat_with(|| None).take(N).collect())
    }

    #[inline(always)]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.as_ref()?.get(index)?.as_ref()
    }

    #[inline(always)]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.0.as_mut()?.get_mut(index)?.as_mut()
    }

    #[inline(always)]
    pub fn insert(&mut self, index: usize, value: T) {
        self.entries()[index] = Some(value);
    }

    #[inline(always)]
    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.0.as_mut()?.get_mut(index)?.take()
    }
}

impl<T: Default, const N: usize> Table<T, N> {
    #[inline(always)]
    pub fn get_or_default(&mut self, index: usize) -> &mut T {
        self.entries()[index].get_or_insert_with(T::default)
    }
}
