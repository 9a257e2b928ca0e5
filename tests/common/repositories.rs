use scoped_unit_of_work::{ExecutionContext, PersistenceResult, SharedHandle};
use uuid::Uuid;

use super::entities::Widget;

/// Repository that only ever holds the shared handle
pub struct WidgetRepository {
    handle: SharedHandle,
}

impl WidgetRepository {
    pub fn new(handle: SharedHandle) -> Self {
        Self { handle }
    }

    pub async fn create(&self, cx: &ExecutionContext, widget: &Widget) -> PersistenceResult<()> {
        self.handle.persist(cx, widget.to_record()).await
    }

    pub async fn save(&self, cx: &ExecutionContext, widget: &Widget) -> PersistenceResult<()> {
        self.handle.merge(cx, widget.to_record()).await.map(|_| ())
    }

    pub async fn find_by_id(
        &self,
        cx: &ExecutionContext,
        id: Uuid,
    ) -> PersistenceResult<Option<Widget>> {
        let record = self.handle.find(cx, Widget::key(id)).await?;
        Ok(record.as_ref().and_then(Widget::from_record))
    }

    pub async fn delete(&self, cx: &ExecutionContext, id: Uuid) -> PersistenceResult<()> {
        self.handle.remove(cx, Widget::key(id)).await
    }
}
