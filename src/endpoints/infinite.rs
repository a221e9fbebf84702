//! Infinite query pages.

use std::fmt;
use std::sync::Arc;

use crate::cache::Data;

/// Inputs for computing the next or previous page param.
#[derive(Debug, Clone, Copy)]
pub struct PageParamContext<'a> {
    /// Last page for "next", first page for "previous".
    pub page: &'a Data,
    pub all_pages: &'a [Data],
    /// Param of `page`.
    pub page_param: &'a Data,
    pub all_page_params: &'a [Data],
    pub query_arg: &'a Data,
}

/// Returns `None` (or `Some(Data::Null)`) when there are no more pages.
pub type PageParamFn = Arc<dyn Fn(&PageParamContext<'_>) -> Option<Data> + Send + Sync>;

/// Page configuration for an infinite query endpoint.
#[derive(Clone)]
pub struct InfiniteQueryConfig {
    pub(crate) initial_page_param: Data,
    pub(crate) max_pages: Option<usize>,
    pub(crate) get_next_page_param: PageParamFn,
    pub(crate) get_previous_page_param: Option<PageParamFn>,
}

impl InfiniteQueryConfig {
    pub fn new<F>(initial_page_param: impl Into<Data>, get_next_page_param: F) -> Self
    where
        F: Fn(&PageParamContext<'_>) -> Option<Data> + Send + Sync + 'static,
    {
        Self {
            initial_page_param: initial_page_param.into(),
            max_pages: None,
            get_next_page_param: Arc::new(get_next_page_param),
            get_previous_page_param: None,
        }
    }

    pub fn get_previous_page_param<F>(mut self, f: F) -> Self
    where
        F: Fn(&PageParamContext<'_>) -> Option<Data> + Send + Sync + 'static,
    {
        self.get_previous_page_param = Some(Arc::new(f));
        self
    }

    /// Keep at most this many pages; the opposite end is dropped.
    pub fn max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = (max_pages > 0).then_some(max_pages);
        self
    }

    pub fn initial_page_param(&self) -> &Data {
        &self.initial_page_param
    }

    /// Param for the page after the last cached one.
    pub fn next_page_param(&self, data: &InfiniteData, query_arg: &Data) -> Option<Data> {
        let (page, param) = (data.pages.last()?, data.page_params.last()?);
        let context = PageParamContext {
            page,
            all_pages: &data.pages,
            page_param: param,
            all_page_params: &data.page_params,
            query_arg,
        };
        (self.get_next_page_param)(&context).filter(|param| !param.is_null())
    }

    /// Param for the page before the first cached one.
    pub fn previous_page_param(&self, data: &InfiniteData, query_arg: &Data) -> Option<Data> {
        let previous = self.get_previous_page_param.as_ref()?;
        let (page, param) = (data.pages.first()?, data.page_params.first()?);
        let context = PageParamContext {
            page,
            all_pages: &data.pages,
            page_param: param,
            all_page_params: &data.page_params,
            query_arg,
        };
        previous(&context).filter(|param| !param.is_null())
    }
}

impl fmt::Debug for InfiniteQueryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfiniteQueryConfig")
            .field("initial_page_param", &self.initial_page_param)
            .field("max_pages", &self.max_pages)
            .field("has_previous", &self.get_previous_page_param.is_some())
            .finish()
    }
}

/// Cached value of an infinite query: `{ "pages": [..], "pageParams": [..] }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfiniteData {
    pub pages: Vec<Data>,
    pub page_params: Vec<Data>,
}

impl InfiniteData {
    /// Read the page structure back out of cached data.
    pub fn from_data(data: &Data) -> Option<Self> {
        let pages = data.get("pages")?.as_array()?.to_vec();
        let page_params = data.get("pageParams")?.as_array()?.to_vec();
        Some(Self { pages, page_params })
    }

    pub fn to_data(&self) -> Data {
        Data::object([
            ("pages", Data::array(self.pages.iter().cloned())),
            ("pageParams", Data::array(self.page_params.iter().cloned())),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub(crate) fn add_to_end(&mut self, page: Data, param: Data, max_pages: Option<usize>) {
        self.pages.push(page);
        self.page_params.push(param);
        if let Some(max) = max_pages {
            while self.pages.len() > max {
                self.pages.remove(0);
                self.page_params.remove(0);
            }
        }
    }

    pub(crate) fn add_to_start(&mut self, page: Data, param: Data, max_pages: Option<usize>) {
        self.pages.insert(0, page);
        self.page_params.insert(0, param);
        if let Some(max) = max_pages {
            self.pages.truncate(max);
            self.page_params.truncate(max);
        }
    }
}
