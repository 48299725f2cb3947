use crate::application::repos::RepoError;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db)
            if db.message().contains("violates check constraint")
                || db.message().contains("invalid input syntax")
                || db.message().contains("invalid input value for enum") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        err @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed) => RepoError::unavailable(err),
        other => RepoError::from_persistence(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_transport_failures_to_unavailable() {
        assert_eq!(map_sqlx_error(sqlx::Error::RowNotFound), RepoError::NotFound);
        assert_eq!(map_sqlx_error(sqlx::Error::PoolTimedOut), RepoError::Timeout);
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            RepoError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::Io(std::io::Error::other("reset"))),
            RepoError::Unavailable(_)
        ));
    }
}
