//! Converts the template contexts in [`crate::render`] into [`Value`]s. Each
//! context becomes a [`Value::Object`] whose keys are the struct's field
//! names, so templates refer to e.g. `{{ .date_time }}`.

use crate::render::{ArchiveList, ArticleList, ArticleView, CategoryList, IndexPage};
use gtmpl_value::Value;
use std::collections::HashMap;

fn strings(items: Vec<String>) -> Value {
    Value::Array(items.into_iter().map(Value::String).collect())
}

fn optional(item: Option<String>) -> Value {
    match item {
        Some(s) => Value::String(s),
        None => Value::Nil,
    }
}

impl From<ArticleView> for Value {
    fn from(view: ArticleView) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("id".to_owned(), Value::String(view.id));
        m.insert("kind".to_owned(), Value::String(view.kind));
        m.insert("title".to_owned(), Value::String(view.title));
        m.insert("author".to_owned(), Value::String(view.author));
        m.insert("img".to_owned(), Value::String(view.img));
        m.insert("imgs".to_owned(), strings(view.imgs));
        m.insert("categories".to_owned(), strings(view.categories));
        m.insert("date".to_owned(), Value::String(view.date));
        m.insert("date_time".to_owned(), Value::String(view.date_time));
        m.insert("location".to_owned(), Value::String(view.location));
        m.insert("text_primary".to_owned(), Value::String(view.text_primary));
        m.insert("text_secondary".to_owned(), Value::String(view.text_secondary));
        m.insert("view_count".to_owned(), Value::from(view.view_count));
        m.insert("rank".to_owned(), Value::from(view.rank));
        Value::Object(m)
    }
}

impl From<ArticleList> for Value {
    fn from(list: ArticleList) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert(
            "articles".to_owned(),
            Value::Array(list.articles.into_iter().map(Value::from).collect()),
        );
        Value::Object(m)
    }
}

impl From<ArchiveList> for Value {
    fn from(list: ArchiveList) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert(
            "archives".to_owned(),
            Value::Array(list.archives.into_iter().map(Value::from).collect()),
        );
        Value::Object(m)
    }
}

impl From<CategoryList> for Value {
    fn from(list: CategoryList) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("categories".to_owned(), strings(list.categories));
        Value::Object(m)
    }
}

impl From<IndexPage> for Value {
    /// The rendered cards are inserted as-is; every other string field has
    /// already been escaped.
    fn from(page: IndexPage) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("cards".to_owned(), strings(page.cards));
        m.insert("page".to_owned(), Value::from(page.page));
        m.insert("category".to_owned(), Value::String(page.category));
        m.insert("search".to_owned(), Value::String(page.search));
        m.insert("month".to_owned(), Value::String(page.month));
        m.insert("year".to_owned(), Value::String(page.year));
        m.insert("prev".to_owned(), optional(page.prev));
        m.insert("next".to_owned(), optional(page.next));
        Value::Object(m)
    }
}
