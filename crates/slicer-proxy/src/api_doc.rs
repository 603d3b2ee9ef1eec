use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::proxy_image),
    components(schemas(ErrorResponse)),
    tags((name = "images", description = "Image derivative proxy"))
)]
struct ApiDoc;

pub(crate) fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
