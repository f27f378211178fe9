#[cfg(test)]
mod tests {
    use crate::authoring;
    use crate::db::content::{content_count, content_text, put_content, reclaim_unreferenced};
    use crate::models::{BlockView, QuestionInput};
    use crate::test::utils::{
        AUTHOR, TestDbBuilder, content, file_test_pool, mcq, question_slot, remove_db_files,
        test_pool, text_block,
    };

    #[tokio::test]
    async fn test_put_content_deduplicates() {
        let pool = test_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let first = put_content(&mut conn, "hello").await.unwrap();
        let second = put_content(&mut conn, "hello").await.unwrap();
        let other = put_content(&mut conn, "Hello").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(content_count(&mut conn).await.unwrap(), 2);
        assert_eq!(content_text(&mut conn, first).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_put_content_reuses_row_written_elsewhere() {
        let (pool, path) = file_test_pool("content-reuse").await.unwrap();
        let mut writer = pool.acquire().await.unwrap();
        let mut reader = pool.acquire().await.unwrap();

        let written = put_content(&mut writer, "shared").await.unwrap();

        assert_eq!(put_content(&mut reader, "shared").await.unwrap(), written);
        let fresh = put_content(&mut reader, "fresh").await.unwrap();
        assert_ne!(fresh, written);
        assert_eq!(content_count(&mut reader).await.unwrap(), 2);

        drop(writer);
        drop(reader);
        pool.close().await;
        remove_db_files(&path);
    }

    #[tokio::test]
    async fn test_missing_content_is_not_found() {
        let pool = test_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let result = content_text(&mut conn, 42).await;
        assert!(matches!(result, Err(crate::error::AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_same_text_shared_across_roles() {
        let test_db = TestDbBuilder::new().course("History").build().await.unwrap();
        let course_id = test_db.course_id("History");
        let pool = &test_db.pool;

        let kp = authoring::create_knowledge_point(pool, AUTHOR, course_id, "Dates")
            .await
            .unwrap();
        let question = QuestionInput {
            explanation: Some("1066".to_string()),
            ..mcq("1066", &["1066", "1067"], 0)
        };
        authoring::add_question(pool, AUTHOR, kp.id, &question)
            .await
            .unwrap();

        // Question body, one choice and the explanation share a row.
        assert_eq!(test_db.content_count().await, 2);

        authoring::create_module(
            pool,
            AUTHOR,
            course_id,
            "Normans",
            "",
            &[text_block("1067"), text_block("1066")],
        )
        .await
        .unwrap();

        assert_eq!(test_db.content_count().await, 2);
    }

    #[tokio::test]
    async fn test_deleting_module_reclaims_only_its_own_content() {
        let test_db = TestDbBuilder::new()
            .course("Letters")
            .module("Letters", "A", vec![content("x"), content("y")])
            .module("Letters", "B", vec![content("y")])
            .build()
            .await
            .unwrap();

        assert_eq!(test_db.content_count().await, 2);

        let reclaimed = authoring::delete_module(&test_db.pool, AUTHOR, test_db.module_id("A"))
            .await
            .unwrap();

        assert_eq!(reclaimed, 1);
        assert_eq!(test_db.content_count().await, 1);

        let view = authoring::load_module_version(&test_db.pool, test_db.module_id("B"), None)
            .await
            .unwrap();
        match &view.blocks[0] {
            BlockView::Content { text, .. } => assert_eq!(text, "y"),
            other => panic!("Unexpected block {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_module_delete_keeps_content_used_by_question_bank() {
        let test_db = TestDbBuilder::new()
            .course("Maths")
            .knowledge_point("Maths", "Sums", vec![mcq("1 + 1", &["2", "3"], 0)])
            .module("Maths", "Intro", vec![content("2"), question_slot("Sums")])
            .build()
            .await
            .unwrap();

        assert_eq!(test_db.content_count().await, 3);

        let reclaimed = authoring::delete_module(&test_db.pool, AUTHOR, test_db.module_id("Intro"))
            .await
            .unwrap();

        assert_eq!(reclaimed, 0);
        assert_eq!(test_db.content_count().await, 3);
    }

    #[tokio::test]
    async fn test_deleting_question_reclaims_unshared_text() {
        let test_db = TestDbBuilder::new()
            .course("Letters")
            .knowledge_point(
                "Letters",
                "Vowels",
                vec![mcq("Q1", &["A", "B"], 0), mcq("Q2", &["A", "C"], 0)],
            )
            .build()
            .await
            .unwrap();

        assert_eq!(test_db.content_count().await, 5);

        let questions = authoring::list_questions(
            &test_db.pool,
            AUTHOR,
            test_db.knowledge_point_id("Vowels"),
            false,
        )
        .await
        .unwrap();
        let q1 = questions.iter().find(|q| q.text == "Q1").unwrap();

        let reclaimed = authoring::delete_question(&test_db.pool, AUTHOR, q1.id)
            .await
            .unwrap();

        assert_eq!(reclaimed, 2);
        assert_eq!(test_db.content_count().await, 3);
    }

    #[tokio::test]
    async fn test_reclaim_leaves_referenced_rows() {
        let test_db = TestDbBuilder::new()
            .course("Letters")
            .module("Letters", "A", vec![content("kept")])
            .build()
            .await
            .unwrap();

        let mut conn = test_db.pool.acquire().await.unwrap();
        let kept = put_content(&mut conn, "kept").await.unwrap();
        let orphan = put_content(&mut conn, "orphan").await.unwrap();

        assert_eq!(reclaim_unreferenced(&mut conn, &[]).await.unwrap(), 0);
        assert_eq!(
            reclaim_unreferenced(&mut conn, &[kept, orphan]).await.unwrap(),
            1
        );
        assert_eq!(content_count(&mut conn).await.unwrap(), 1);
    }
}
