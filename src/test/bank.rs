#[cfg(test)]
mod tests {
    use crate::allocator::FixedSelector;
    use crate::error::AppError;
    use crate::models::QuestionInput;
    use crate::test::utils::{
        AUTHOR, STUDENT, TestDbBuilder, create_standard_test_db, mcq, rendered_question_id,
    };
    use crate::{authoring, learning};

    #[rocket::async_test]
    async fn test_add_question_marks_exactly_one_choice_correct() {
        let test_db = TestDbBuilder::new()
            .course("Maths")
            .knowledge_point("Maths", "Sums", vec![])
            .build()
            .await
            .unwrap();
        let kp_id = test_db.knowledge_point_id("Sums");

        let question = QuestionInput {
            explanation: Some("Count on your fingers".to_string()),
            ..mcq("2 + 2", &["3", "4", "5"], 1)
        };
        let detail = authoring::add_question(&test_db.pool, AUTHOR, kp_id, &question)
            .await
            .unwrap();

        assert!(detail.latest);
        assert_eq!(detail.text, "2 + 2");
        assert_eq!(detail.choices.len(), 3);
        let correct: Vec<&str> = detail
            .choices
            .iter()
            .filter(|c| c.correct)
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(correct, vec!["4"]);
        assert_eq!(detail.explanation.as_deref(), Some("Count on your fingers"));

        let fetched = authoring::get_question(&test_db.pool, AUTHOR, detail.id)
            .await
            .unwrap();
        assert_eq!(fetched.choices.len(), 3);
    }

    #[rocket::async_test]
    async fn test_blank_explanation_is_dropped() {
        let test_db = TestDbBuilder::new()
            .course("Maths")
            .knowledge_point("Maths", "Sums", vec![])
            .build()
            .await
            .unwrap();

        let question = QuestionInput {
            explanation: Some("  ".to_string()),
            ..mcq("2 + 2", &["3", "4"], 1)
        };
        let detail = authoring::add_question(
            &test_db.pool,
            AUTHOR,
            test_db.knowledge_point_id("Sums"),
            &question,
        )
        .await
        .unwrap();

        assert!(detail.explanation.is_none());
        assert_eq!(test_db.content_count().await, 3);
    }

    #[rocket::async_test]
    async fn test_malformed_questions_are_rejected() {
        let test_db = TestDbBuilder::new()
            .course("Maths")
            .knowledge_point("Maths", "Sums", vec![])
            .build()
            .await
            .unwrap();
        let kp_id = test_db.knowledge_point_id("Sums");

        for question in [
            mcq("2 + 2", &["4"], 0),
            mcq("2 + 2", &["3", "4"], 2),
            mcq("", &["3", "4"], 0),
            mcq("2 + 2", &["3", ""], 0),
        ] {
            let result = authoring::add_question(&test_db.pool, AUTHOR, kp_id, &question).await;
            assert!(matches!(result, Err(AppError::Validation(_))));
        }

        assert_eq!(test_db.content_count().await, 0);
    }

    #[rocket::async_test]
    async fn test_retire_keeps_history() {
        let test_db = create_standard_test_db().await;
        let kp_id = test_db.knowledge_point_id("Capitals");

        let retired = authoring::retire_questions(&test_db.pool, AUTHOR, kp_id)
            .await
            .unwrap();
        assert_eq!(retired, 2);

        let latest = authoring::list_questions(&test_db.pool, AUTHOR, kp_id, true)
            .await
            .unwrap();
        assert!(latest.is_empty());

        let all = authoring::list_questions(&test_db.pool, AUTHOR, kp_id, false)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|q| !q.latest));
    }

    #[rocket::async_test]
    async fn test_knowledge_point_crud() {
        let test_db = TestDbBuilder::new().course("Maths").build().await.unwrap();
        let course_id = test_db.course_id("Maths");
        let pool = &test_db.pool;

        let kp = authoring::create_knowledge_point(pool, AUTHOR, course_id, "Sums")
            .await
            .unwrap();
        let renamed = authoring::rename_knowledge_point(pool, AUTHOR, kp.id, "Addition")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Addition");
        assert_eq!(renamed.course_id, course_id);

        let listed = authoring::list_knowledge_points(pool, AUTHOR, course_id)
            .await
            .unwrap();
        assert_eq!(listed, vec![renamed]);

        authoring::delete_knowledge_point(pool, AUTHOR, kp.id)
            .await
            .unwrap();
        let listed = authoring::list_knowledge_points(pool, AUTHOR, course_id)
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[rocket::async_test]
    async fn test_bank_is_owner_only() {
        let test_db = create_standard_test_db().await;
        let kp_id = test_db.knowledge_point_id("Capitals");
        let pool = &test_db.pool;

        let result = authoring::list_knowledge_points(pool, STUDENT, test_db.course_id("Geography")).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));

        let result = authoring::add_question(pool, STUDENT, kp_id, &mcq("?", &["a", "b"], 0)).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));

        let result = authoring::list_questions(pool, STUDENT, kp_id, false).await;
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[rocket::async_test]
    async fn test_knowledge_point_in_use_cannot_be_deleted() {
        let test_db = create_standard_test_db().await;
        let kp_id = test_db.knowledge_point_id("Capitals");

        let result = authoring::delete_knowledge_point(&test_db.pool, AUTHOR, kp_id).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[rocket::async_test]
    async fn test_issued_question_cannot_be_deleted() {
        let test_db = create_standard_test_db().await;
        let module_id = test_db.module_id("Europe");
        let pool = &test_db.pool;
        let selector = FixedSelector(0);

        learning::take_block(pool, &selector, STUDENT, module_id, 0)
            .await
            .unwrap();
        let page = learning::take_block(pool, &selector, STUDENT, module_id, 1)
            .await
            .unwrap();
        let issued = rendered_question_id(&page.block);

        let result = authoring::delete_question(pool, AUTHOR, issued).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let others: Vec<i64> = authoring::list_questions(
            pool,
            AUTHOR,
            test_db.knowledge_point_id("Capitals"),
            false,
        )
        .await
        .unwrap()
        .into_iter()
        .map(|q| q.id)
        .filter(|id| *id != issued)
        .collect();
        assert_eq!(others.len(), 1);

        authoring::delete_question(pool, AUTHOR, others[0])
            .await
            .unwrap();
        let result = authoring::get_question(pool, AUTHOR, others[0]).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
